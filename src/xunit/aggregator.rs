//! XUnit report aggregation.
//!
//! Loads a list of XUnit files, normalizes each one to a `testsuites`
//! root, concatenates their suites and recomputes the root counters.

use super::document::{Document, DocumentError, Element, Node};
use crate::models::{AggregateSummary, ResultCounts};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

pub const TESTSUITES: &str = "testsuites";
pub const TESTSUITE: &str = "testsuite";
pub const TESTCASE: &str = "testcase";
pub const FAILURE: &str = "failure";
pub const ERROR: &str = "error";

const CAPTURED_OUTPUT: [&str; 2] = ["system-out", "system-err"];

/// Aggregation failures. Nothing is written when any of these is returned.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("No xml results files provided")]
    NoInputs,

    #[error("XUnit file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse XUnit file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Options applied while normalizing each input.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateOptions {
    /// Drop `system-out` / `system-err` elements from every input.
    pub strip_system_output: bool,
}

/// The in-memory result of merging a set of inputs.
#[derive(Debug, Clone)]
pub struct MergedReport {
    pub document: Document,
    pub counts: ResultCounts,
    pub suites: usize,
    pub inputs: usize,
}

/// Merges XUnit files into one aggregated report.
#[derive(Debug, Clone, Default)]
pub struct XunitAggregator {
    options: AggregateOptions,
}

impl XunitAggregator {
    pub fn new(options: AggregateOptions) -> Self {
        Self { options }
    }

    /// Load, normalize and merge `files` without touching the filesystem
    /// beyond reading the inputs.
    pub fn merge<P: AsRef<Path>>(&self, files: &[P]) -> Result<MergedReport, AggregateError> {
        if files.is_empty() {
            return Err(AggregateError::NoInputs);
        }

        let mut roots = Vec::with_capacity(files.len());
        for file in files {
            roots.push(self.load_normalized(file.as_ref())?);
        }

        let mut root = merge_roots(roots);
        let counts = count_results(&root);
        apply_counts(&mut root, &counts);
        let suites = root.children_named(TESTSUITE).count();

        Ok(MergedReport {
            document: Document::new(root),
            counts,
            suites,
            inputs: files.len(),
        })
    }

    /// Merge `files` and write the result to `destination`, overwriting it.
    pub fn aggregate<P: AsRef<Path>>(
        &self,
        files: &[P],
        destination: &Path,
    ) -> Result<AggregateSummary, AggregateError> {
        let merged = self.merge(files)?;
        write_report(&merged.document, destination)?;

        info!(
            "Aggregated {} XUnit file(s) into {}: tests={} failures={} errors={}",
            merged.inputs,
            destination.display(),
            merged.counts.tests,
            merged.counts.failures,
            merged.counts.errors
        );

        Ok(AggregateSummary {
            path: destination.to_path_buf(),
            inputs: merged.inputs,
            suites: merged.suites,
            counts: merged.counts,
        })
    }

    /// Read one input and return its normalized `testsuites` root.
    pub fn load_normalized(&self, path: &Path) -> Result<Element, AggregateError> {
        if !path.is_file() {
            return Err(AggregateError::NotFound(path.to_path_buf()));
        }

        let content = fs::read(path).map_err(|source| AggregateError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let document = Document::from_bytes(&content).map_err(|source| AggregateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut root = normalize_root(document.root);
        if self.options.strip_system_output {
            let removed = root.remove_descendants(&CAPTURED_OUTPUT);
            debug!("Stripped {} captured output element(s) from {}", removed, path.display());
        }

        debug!(
            "Loaded {} with {} suite(s)",
            path.display(),
            root.children_named(TESTSUITE).count()
        );
        Ok(root)
    }
}

/// Wrap a `testsuite` root in a fresh `testsuites` element and clear the
/// root attributes.
pub fn normalize_root(root: Element) -> Element {
    let mut root = if root.name == TESTSUITE {
        let mut wrapper = Element::new(TESTSUITES);
        wrapper.children.push(Node::Element(root));
        wrapper
    } else {
        root
    };

    root.clear_attributes();
    root
}

/// Concatenate the element children of every root, in order, under one
/// `testsuites` element. Duplicates are kept.
pub fn merge_roots(roots: Vec<Element>) -> Element {
    let mut merged = Element::new(TESTSUITES);

    for child in roots.into_iter().flat_map(Element::into_child_elements) {
        merged.children.push(Node::Text("\n  ".to_string()));
        merged.children.push(Node::Element(child));
    }
    if !merged.children.is_empty() {
        merged.children.push(Node::Text("\n".to_string()));
    }

    merged
}

/// Count `testsuite/testcase` elements under `root`, and those carrying a
/// `failure` or `error` child.
pub fn count_results(root: &Element) -> ResultCounts {
    let mut counts = ResultCounts::default();

    for case in root
        .children_named(TESTSUITE)
        .flat_map(|suite| suite.children_named(TESTCASE))
    {
        counts.tests += 1;
        if case.has_child(FAILURE) {
            counts.failures += 1;
        }
        if case.has_child(ERROR) {
            counts.errors += 1;
        }
    }

    counts
}

/// Replace every root attribute with exactly `tests`, `failures`, `errors`.
pub fn apply_counts(root: &mut Element, counts: &ResultCounts) {
    root.clear_attributes();
    root.set_attribute("tests", counts.tests.to_string());
    root.set_attribute("failures", counts.failures.to_string());
    root.set_attribute("errors", counts.errors.to_string());
}

/// Serialize `document` and move it over `destination` in one step.
pub fn write_report(document: &Document, destination: &Path) -> Result<(), AggregateError> {
    let io_err = |source: io::Error| AggregateError::Io {
        path: destination.to_path_buf(),
        source,
    };

    let bytes = document
        .to_xml_bytes()
        .map_err(|e| io_err(io::Error::new(io::ErrorKind::Other, e.to_string())))?;

    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.persist(destination).map_err(|e| io_err(e.error))?;

    Ok(())
}
