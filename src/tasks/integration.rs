//! Integration test runs.
//!
//! One run invokes the external runner for a single configuration; the
//! suite variant discovers every configuration and fans the runs out.

use super::{log_captured_output, log_output, CiTasks};
use crate::config::IntegrationConfig;
use crate::models::{seconds_between, IntegrationRun, IntegrationSuiteResult, RunContext};
use crate::process::{run_checked, CommandSpec, ProcessRunner};
use crate::scanner::{discover_tests, DiscoveryConfig};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// XUnit file name written in every per-configuration output directory.
pub const XUNIT_FILE_NAME: &str = "xunit_results.xml";
/// Coverage data file name written in every per-configuration output directory.
pub const COVERAGE_FILE_NAME: &str = ".coverage";

/// Options for a single runner invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationOptions {
    pub test_config: Option<String>,
    pub tests_file: Option<PathBuf>,
    /// Runner log directory; defaults to `<logs_dir>/flow_test_logs`.
    pub output_dir: Option<PathBuf>,
    pub xunit_file: Option<PathBuf>,
    pub coverage: bool,
    pub public_runs: bool,
}

/// Options for running every discovered configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteOptions {
    /// Directory scanned for configurations; defaults to the configured one.
    pub tests_dir: Option<PathBuf>,
    /// Parent of the per-configuration output directories; defaults to
    /// `<logs_dir>/integration_tests_logs`.
    pub output_dir: Option<PathBuf>,
    pub coverage: bool,
    pub public_runs: bool,
}

/// Build the runner command line for one invocation.
pub fn runner_command(
    program: &str,
    opts: &IntegrationOptions,
    output_dir: &Path,
    timeout: Duration,
) -> CommandSpec {
    let mut spec = CommandSpec::new(program)
        .arg("--logs")
        .arg(output_dir.to_string_lossy())
        .timeout(timeout);

    if let Some(ref name) = opts.test_config {
        spec = spec.arg("--config").arg(name.as_str());
    }
    if let Some(ref file) = opts.tests_file {
        spec = spec.arg("--tests").arg(file.to_string_lossy());
    }
    if let Some(ref xunit) = opts.xunit_file {
        spec = spec.arg("--xunit_file_name").arg(xunit.to_string_lossy());
    }
    if opts.coverage {
        spec = spec.arg("--coverage");
    }
    if opts.public_runs {
        spec = spec.arg("--public_runs");
    }

    spec
}

impl CiTasks {
    /// Run the integration runner once.
    pub async fn run_integration_tests(&self, opts: &IntegrationOptions) -> Result<IntegrationRun> {
        execute_run(
            self.runner.clone(),
            self.config.integration.clone(),
            self.ctx.clone(),
            opts.clone(),
        )
        .await
    }

    /// Discover every configuration and run them in parallel.
    ///
    /// Fails when nothing is discovered or when any run fails; the error
    /// names the failed configurations.
    pub async fn run_all_integration_tests(
        &self,
        opts: &SuiteOptions,
    ) -> Result<IntegrationSuiteResult> {
        let tests_dir = opts
            .tests_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.config.integration.tests_dir));
        let logs_dir = opts
            .output_dir
            .clone()
            .unwrap_or_else(|| self.ctx.integration_logs_dir());

        let configs = discover_tests(&tests_dir, &DiscoveryConfig::from(&self.config.integration))?;
        if configs.is_empty() {
            bail!("No integration tests to run in {}", tests_dir.display());
        }

        info!(
            "Running {} integration configuration(s) from {}",
            configs.len(),
            tests_dir.display()
        );

        let mut result = IntegrationSuiteResult::default();
        let mut jobs = Vec::with_capacity(configs.len());

        for config in &configs {
            let output_dir = logs_dir.join(&config.name);
            let xunit_file = output_dir.join(XUNIT_FILE_NAME);
            result.xunit_files.push(xunit_file.clone());
            result.coverage_files.push(output_dir.join(COVERAGE_FILE_NAME));

            let run_opts = IntegrationOptions {
                test_config: Some(config.name.clone()),
                tests_file: Some(config.filepath.clone()),
                output_dir: Some(output_dir),
                xunit_file: Some(xunit_file),
                coverage: opts.coverage,
                public_runs: opts.public_runs,
            };
            jobs.push(execute_run(
                self.runner.clone(),
                self.config.integration.clone(),
                self.ctx.clone(),
                run_opts,
            ));
        }

        let executor = self
            .executor
            .clone()
            .with_progress(self.progress_bar(configs.len()));
        let outcomes = executor.run_all(jobs).await;

        let mut failed = Vec::new();
        for (config, outcome) in configs.iter().zip(outcomes) {
            match outcome {
                Ok(run) => result.runs.push(run),
                Err(e) => {
                    error!("Integration configuration {} failed: {:#}", config.name, e);
                    failed.push(config.name.as_str());
                }
            }
        }

        if !failed.is_empty() {
            bail!("Some tests failed: {}", failed.join(", "));
        }

        Ok(result)
    }
}

async fn execute_run(
    runner: Arc<dyn ProcessRunner>,
    settings: IntegrationConfig,
    ctx: RunContext,
    opts: IntegrationOptions,
) -> Result<IntegrationRun> {
    if opts.test_config.is_none() && opts.tests_file.is_none() {
        bail!("Must provide at least a test configuration name or a tests file");
    }

    let output_dir = opts
        .output_dir
        .clone()
        .unwrap_or_else(|| ctx.flow_test_logs_dir());
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let label = run_label(&opts);
    let spec = runner_command(&settings.runner, &opts, &output_dir, settings.timeout());
    info!("Running integration tests for {}", label);

    let started_at = Utc::now();
    let output = match run_checked(runner.as_ref(), &spec).await {
        Ok(output) => output,
        Err(err) => {
            log_captured_output(&err);
            return Err(anyhow::Error::new(err)
                .context(format!("Integration tests failed for {}", label)));
        }
    };
    let finished_at = Utc::now();

    log_output(&output.stdout, &output.stderr);

    let elapsed_seconds = seconds_between(started_at, finished_at);
    info!("Integration tests for {} passed in {:.1}s", label, elapsed_seconds);

    Ok(IntegrationRun {
        name: label,
        output_dir,
        xunit_file: opts.xunit_file,
        started_at,
        finished_at,
        elapsed_seconds,
    })
}

fn run_label(opts: &IntegrationOptions) -> String {
    if let Some(ref name) = opts.test_config {
        return name.clone();
    }
    opts.tests_file
        .as_deref()
        .and_then(|f| f.file_name())
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}
