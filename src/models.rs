//! Data models shared by the CI tasks.
//!
//! This module contains the run context, discovered test configurations,
//! and the records each task returns.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Per-run working directory context. All default output locations are
/// derived from `logs_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    logs_dir: PathBuf,
}

impl RunContext {
    /// Creates a context rooted at `logs_dir`, made absolute against the
    /// current directory so child processes with another cwd still see it.
    pub fn new(logs_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            logs_dir: absolute(logs_dir.as_ref())?,
        })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.logs_dir.join(name)
    }

    /// Default output directory of a single integration run.
    pub fn flow_test_logs_dir(&self) -> PathBuf {
        self.join("flow_test_logs")
    }

    /// Default parent directory of per-configuration integration runs.
    pub fn integration_logs_dir(&self) -> PathBuf {
        self.join("integration_tests_logs")
    }

    pub fn unit_xunit_path(&self) -> PathBuf {
        self.join("unit_tests_xunit_results.xml")
    }

    pub fn unit_coverage_path(&self) -> PathBuf {
        self.join("unit_tests_coverage.dat")
    }

    pub fn aggregated_xunit_path(&self) -> PathBuf {
        self.join("aggregated_xunit_results.xml")
    }

    pub fn aggregated_coverage_path(&self) -> PathBuf {
        self.join("aggregated_coverage.dat")
    }

    pub fn coverage_index_path(&self) -> PathBuf {
        self.join("htmlcov").join("index.html")
    }

    pub fn summary_json_path(&self) -> PathBuf {
        self.join("ci_summary.json")
    }

    pub fn summary_markdown_path(&self) -> PathBuf {
        self.join("ci_summary.md")
    }
}

/// Resolve `path` against the current directory when it is relative.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

/// A discovered integration-test configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Configuration name passed to the runner with `--config`.
    pub name: String,
    /// File defining the configuration, passed with `--tests`.
    pub filepath: PathBuf,
}

impl fmt::Display for TestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.filepath.display())
    }
}

/// Outcome counters of an XUnit report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub tests: usize,
    pub failures: usize,
    pub errors: usize,
}

impl ResultCounts {
    /// Test-cases with neither a failure nor an error marker, assuming no
    /// case carries both.
    pub fn passed(&self) -> usize {
        self.tests.saturating_sub(self.failures + self.errors)
    }

    pub fn is_green(&self) -> bool {
        self.failures == 0 && self.errors == 0
    }
}

/// What an XUnit aggregation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSummary {
    /// Where the aggregated report was written.
    pub path: PathBuf,
    /// Number of input files merged.
    pub inputs: usize,
    /// Number of `testsuite` elements in the output.
    pub suites: usize,
    pub counts: ResultCounts,
}

/// One invocation of the integration test runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRun {
    /// Configuration name, or the tests file name when no name was given.
    pub name: String,
    pub output_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xunit_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
}

/// Result of fanning out every discovered integration configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationSuiteResult {
    pub runs: Vec<IntegrationRun>,
    /// Expected XUnit file per configuration, in discovery order.
    pub xunit_files: Vec<PathBuf>,
    /// Expected coverage data file per configuration, in discovery order.
    pub coverage_files: Vec<PathBuf>,
}

/// Files produced by the unit test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestArtifacts {
    pub xunit_file: PathBuf,
    pub coverage_file: PathBuf,
}

/// Everything a full `run-tests` pipeline produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub logs_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub unit: UnitTestArtifacts,
    pub integration: IntegrationSuiteResult,
    pub xunit: AggregateSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_index: Option<PathBuf>,
}

/// Seconds between two timestamps, with millisecond precision.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}
