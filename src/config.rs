//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.ci-bundle.toml` files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".ci-bundle.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Integration test settings.
    #[serde(default)]
    pub integration: IntegrationConfig,

    /// Unit test settings.
    #[serde(default)]
    pub unit: UnitConfig,

    /// Coverage tool settings.
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// XUnit aggregation settings.
    #[serde(default)]
    pub xunit: XunitConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory that receives every log, report and data file of a run.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of integration configurations run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// Integration test runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Directory scanned for test configurations.
    #[serde(default = "default_integration_dir")]
    pub tests_dir: String,

    /// Test runner executable.
    #[serde(default = "default_runner")]
    pub runner: String,

    /// Per-run timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Ask the runner to collect coverage.
    #[serde(default = "default_true")]
    pub coverage: bool,

    /// Pass `--public_runs` to the runner.
    #[serde(default)]
    pub public_runs: bool,

    /// File extensions that define a test configuration.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Names skipped during discovery.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            tests_dir: default_integration_dir(),
            runner: default_runner(),
            timeout_seconds: default_timeout(),
            coverage: true,
            public_runs: false,
            extensions: default_extensions(),
            excludes: default_excludes(),
        }
    }
}

impl IntegrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_integration_dir() -> String {
    "tests/integration_tests/".to_string()
}

fn default_runner() -> String {
    "flow_tests".to_string()
}

fn default_timeout() -> u64 {
    6 * 60
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_excludes() -> Vec<String> {
    vec!["__pycache__", "data"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Unit test settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Directory searched for unit tests.
    #[serde(default = "default_unit_dir")]
    pub tests_dir: String,

    /// File pattern handed to test discovery.
    #[serde(default = "default_unit_pattern")]
    pub pattern: String,

    /// Module run under coverage to execute and report the tests.
    #[serde(default = "default_unit_module")]
    pub runner_module: String,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            tests_dir: default_unit_dir(),
            pattern: default_unit_pattern(),
            runner_module: default_unit_module(),
        }
    }
}

fn default_unit_dir() -> String {
    "tests/unit_tests".to_string()
}

fn default_unit_pattern() -> String {
    "*_tests.py".to_string()
}

fn default_unit_module() -> String {
    "xmlrunner".to_string()
}

/// Coverage tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Coverage executable.
    #[serde(default = "default_coverage_program")]
    pub program: String,

    /// Title of the HTML report.
    #[serde(default = "default_html_title")]
    pub html_title: String,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            program: default_coverage_program(),
            html_title: default_html_title(),
        }
    }
}

fn default_coverage_program() -> String {
    "coverage".to_string()
}

fn default_html_title() -> String {
    "Code Coverage".to_string()
}

/// XUnit aggregation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XunitConfig {
    /// Drop `system-out` / `system-err` from aggregated reports.
    #[serde(default)]
    pub strip_system_output: bool,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings and only
    /// override when explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref logs_dir) = args.logs_dir {
            self.general.logs_dir = logs_dir.to_string_lossy().into_owned();
        }

        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }

        if let Some(timeout) = args.timeout {
            self.integration.timeout_seconds = timeout;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check the merged settings. Run after [`Config::merge_with_args`],
    /// since values may come from the file, the command line or both.
    pub fn validate(&self) -> Result<()> {
        if self.general.concurrency == 0 {
            bail!("general.concurrency must be at least 1");
        }
        if self.integration.timeout_seconds == 0 {
            bail!("integration.timeout_seconds must be at least 1");
        }
        if self.integration.runner.trim().is_empty() {
            bail!("integration.runner must not be empty");
        }
        if self.coverage.program.trim().is_empty() {
            bail!("coverage.program must not be empty");
        }
        if self.integration.extensions.is_empty() {
            bail!("integration.extensions must list at least one extension");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.logs_dir, "logs");
        assert_eq!(config.integration.runner, "flow_tests");
        assert_eq!(config.integration.timeout(), Duration::from_secs(360));
        assert!(config.integration.coverage);
        assert_eq!(config.unit.pattern, "*_tests.py");
        assert_eq!(config.coverage.html_title, "Code Coverage");
        assert!(!config.xunit.strip_system_output);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
logs_dir = "/var/ci/run-7"
concurrency = 8

[integration]
tests_dir = "it/"
timeout_seconds = 60
public_runs = true

[xunit]
strip_system_output = true
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.logs_dir, "/var/ci/run-7");
        assert_eq!(config.general.concurrency, 8);
        assert_eq!(config.integration.tests_dir, "it/");
        assert_eq!(config.integration.timeout_seconds, 60);
        assert!(config.integration.public_runs);
        assert_eq!(config.integration.runner, "flow_tests");
        assert!(config.xunit.strip_system_output);
        assert_eq!(config.unit.tests_dir, "tests/unit_tests");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[integration]"));
        assert!(toml_str.contains("[coverage]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.integration.timeout_seconds, 360);
    }

    #[test]
    fn test_validate_rejects_zero_values_from_file() {
        let config: Config = toml::from_str("[integration]\ntimeout_seconds = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));

        let config: Config = toml::from_str("[general]\nconcurrency = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[integration]\nrunner = \"  \"\n").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_cli_override_repairs_file_value() {
        use clap::Parser;

        let mut config: Config = toml::from_str("[integration]\ntimeout_seconds = 0\n").unwrap();
        let args = crate::cli::Args::try_parse_from(["ci-bundle", "--timeout", "30", "run-tests"]).unwrap();

        config.merge_with_args(&args);

        assert!(config.validate().is_ok());
        assert_eq!(config.integration.timeout_seconds, 30);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[coverage]\nprogram = \"/opt/venv/bin/coverage\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.coverage.program, "/opt/venv/bin/coverage");

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
