//! Unit tests under coverage.

use super::{log_captured_output, log_output, CiTasks};
use crate::models::{absolute, UnitTestArtifacts};
use crate::process::{run_checked, CommandSpec};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the coverage data file.
pub const COVERAGE_FILE_ENV: &str = "COVERAGE_FILE";

impl CiTasks {
    /// Run the unit tests with coverage, producing an XUnit file and a
    /// coverage data file in the logs directory.
    pub async fn run_unit_tests(&self, tests_dir: Option<&Path>) -> Result<UnitTestArtifacts> {
        let tests_dir = tests_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&self.config.unit.tests_dir));
        if !tests_dir.exists() {
            bail!("{} does not exist", tests_dir.display());
        }
        let tests_dir = absolute(&tests_dir)?;

        fs::create_dir_all(self.ctx.logs_dir()).with_context(|| {
            format!("Failed to create {}", self.ctx.logs_dir().display())
        })?;

        let artifacts = UnitTestArtifacts {
            xunit_file: self.ctx.unit_xunit_path(),
            coverage_file: self.ctx.unit_coverage_path(),
        };

        let spec = CommandSpec::new(&self.config.coverage.program)
            .args(["run", "-m", self.config.unit.runner_module.as_str(), "discover"])
            .arg("-s")
            .arg(tests_dir.to_string_lossy())
            .arg("-p")
            .arg(self.config.unit.pattern.as_str())
            .arg("--output-file")
            .arg(artifacts.xunit_file.to_string_lossy())
            .env(COVERAGE_FILE_ENV, artifacts.coverage_file.to_string_lossy());

        info!("Running unit tests and coverage in {}", tests_dir.display());
        match run_checked(self.runner.as_ref(), &spec).await {
            Ok(output) => {
                info!("Unit tests finished in {:.1}s", output.elapsed.as_secs_f64());
                log_output(&output.stdout, &output.stderr);
            }
            Err(err) => {
                log_captured_output(&err);
                return Err(anyhow::Error::new(err).context("Unit tests failed"));
            }
        }

        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::RunContext;
    use crate::process::testing::RecordingRunner;
    use crate::process::ProcessOutput;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unit_command_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let unit_dir = dir.path().join("unit");
        fs::create_dir_all(&unit_dir).unwrap();
        let ctx = RunContext::new(dir.path().join("logs")).unwrap();
        let runner = Arc::new(RecordingRunner::succeeding());
        let tasks = CiTasks::new(ctx.clone(), Config::default(), runner.clone());

        let artifacts = tasks.run_unit_tests(Some(&unit_dir)).await.unwrap();

        assert_eq!(artifacts.xunit_file, ctx.join("unit_tests_xunit_results.xml"));
        assert_eq!(artifacts.coverage_file, ctx.join("unit_tests_coverage.dat"));

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let spec = &calls[0];
        assert_eq!(spec.program, "coverage");
        assert_eq!(
            spec.args,
            vec![
                "run".to_string(),
                "-m".to_string(),
                "xmlrunner".to_string(),
                "discover".to_string(),
                "-s".to_string(),
                unit_dir.to_string_lossy().into_owned(),
                "-p".to_string(),
                "*_tests.py".to_string(),
                "--output-file".to_string(),
                artifacts.xunit_file.to_string_lossy().into_owned(),
            ]
        );
        assert_eq!(
            spec.env_value(COVERAGE_FILE_ENV),
            Some(artifacts.coverage_file.to_string_lossy().as_ref())
        );
    }

    #[tokio::test]
    async fn test_missing_unit_dir() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path()).unwrap();
        let runner = Arc::new(RecordingRunner::succeeding());
        let tasks = CiTasks::new(ctx, Config::default(), runner.clone());

        let err = tasks
            .run_unit_tests(Some(&dir.path().join("absent")))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("does not exist"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unit_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path()).unwrap();
        let runner = Arc::new(RecordingRunner::with(|_| {
            Ok(ProcessOutput {
                code: Some(1),
                ..Default::default()
            })
        }));
        let tasks = CiTasks::new(ctx, Config::default(), runner);

        let err = tasks.run_unit_tests(Some(dir.path())).await.unwrap_err();

        assert_eq!(err.to_string(), "Unit tests failed");
    }
}
