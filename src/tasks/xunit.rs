//! XUnit collection and aggregation tasks.

use super::integration::XUNIT_FILE_NAME;
use super::CiTasks;
use crate::models::AggregateSummary;
use crate::xunit::{AggregateOptions, XunitAggregator};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

impl CiTasks {
    /// Collect `<dir>/<config>/xunit_results.xml` for every configuration
    /// directory that has one, sorted by path.
    pub fn collect_xunits(&self, dir: Option<&Path>) -> Result<Vec<PathBuf>> {
        let dir = dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.ctx.integration_logs_dir());

        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?;

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let xml_file = entry.path().join(XUNIT_FILE_NAME);
            if xml_file.exists() {
                files.push(xml_file);
            } else {
                debug!("No XUnit results in {}", entry.path().display());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Merge `files` into one report at `destination`, or at
    /// `<logs_dir>/aggregated_xunit_results.xml` when none is given.
    pub fn aggregate_xunit(
        &self,
        files: &[PathBuf],
        destination: Option<&Path>,
    ) -> Result<AggregateSummary> {
        let destination = destination
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.ctx.aggregated_xunit_path());

        let aggregator = XunitAggregator::new(AggregateOptions {
            strip_system_output: self.config.xunit.strip_system_output,
        });

        Ok(aggregator.aggregate(files, &destination)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::RunContext;
    use crate::process::testing::RecordingRunner;
    use crate::xunit::aggregator::AggregateError;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SUITE: &str = r#"<testsuite name="s" time="1.25"><testcase name="a"/><testcase name="b"><error/></testcase></testsuite>"#;

    fn tasks(dir: &TempDir) -> CiTasks {
        let ctx = RunContext::new(dir.path()).unwrap();
        CiTasks::new(ctx, Config::default(), Arc::new(RecordingRunner::succeeding()))
    }

    #[test]
    fn test_collect_xunits() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("integration_tests_logs");
        for (name, with_xunit) in [("beta", true), ("alpha", true), ("empty", false)] {
            let config_dir = logs.join(name);
            fs::create_dir_all(&config_dir).unwrap();
            if with_xunit {
                fs::write(config_dir.join(XUNIT_FILE_NAME), SUITE).unwrap();
            }
        }

        let files = tasks(&dir).collect_xunits(None).unwrap();

        assert_eq!(
            files,
            vec![
                logs.join("alpha").join(XUNIT_FILE_NAME),
                logs.join("beta").join(XUNIT_FILE_NAME),
            ]
        );
    }

    #[test]
    fn test_collect_xunits_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(tasks(&dir).collect_xunits(None).is_err());
    }

    #[test]
    fn test_aggregate_to_default_destination() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.xml");
        fs::write(&input, SUITE).unwrap();
        let tasks = tasks(&dir);

        let summary = tasks.aggregate_xunit(&[input.clone(), input], None).unwrap();

        assert_eq!(summary.path, tasks.context().aggregated_xunit_path());
        assert_eq!(summary.counts.tests, 4);
        assert_eq!(summary.counts.errors, 2);
        assert!(summary.path.exists());
    }

    #[test]
    fn test_aggregate_keeps_error_kind() {
        let dir = TempDir::new().unwrap();

        let err = tasks(&dir).aggregate_xunit(&[], None).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AggregateError>(),
            Some(AggregateError::NoInputs)
        ));
    }
}
