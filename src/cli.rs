//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ci-bundle - CI orchestration tasks
///
/// Runs integration and unit tests, combines coverage data and merges
/// XUnit result files into one aggregated report.
///
/// Examples:
///   ci-bundle run-tests --logs-dir /tmp/ci-run
///   ci-bundle run-all-integration-tests --tests-dir tests/integration_tests
///   ci-bundle aggregate-xunit a.xml b.xml -o merged.xml
///   ci-bundle init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .ci-bundle.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Directory receiving all logs, reports and data files of this run
    #[arg(long, value_name = "DIR", env = "CI_BUNDLE_LOGS_DIR", global = true)]
    pub logs_dir: Option<PathBuf>,

    /// Number of integration configurations run concurrently
    #[arg(long, value_name = "NUM", global = true)]
    pub concurrency: Option<usize>,

    /// Integration runner timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Merge XUnit XML files into one report
    AggregateXunit {
        /// XUnit files to merge, in order
        #[arg(value_name = "FILES")]
        files: Vec<PathBuf>,

        /// Output file (default: <logs-dir>/aggregated_xunit_results.xml)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Drop system-out / system-err elements from the merged report
        #[arg(long)]
        strip_system_output: bool,
    },

    /// List per-configuration XUnit files under an integration logs directory
    CollectXunits {
        /// Directory to search (default: <logs-dir>/integration_tests_logs)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Run the integration test runner once
    RunIntegrationTests {
        /// Test configuration name
        #[arg(long, value_name = "NAME")]
        test_config: Option<String>,

        /// File holding the test configuration
        #[arg(long, value_name = "FILE")]
        tests_file: Option<PathBuf>,

        /// Runner log directory (default: <logs-dir>/flow_test_logs)
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// XUnit file the runner should write
        #[arg(long, value_name = "FILE")]
        xunit_file: Option<PathBuf>,

        #[command(flatten)]
        flags: RunnerFlags,
    },

    /// Discover every integration configuration and run them in parallel
    RunAllIntegrationTests {
        /// Directory scanned for configurations
        #[arg(long, value_name = "DIR")]
        tests_dir: Option<PathBuf>,

        /// Parent of per-configuration log directories
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        flags: RunnerFlags,
    },

    /// Run unit tests under coverage
    RunUnitTests {
        /// Unit tests directory
        #[arg(long, value_name = "DIR")]
        tests_dir: Option<PathBuf>,
    },

    /// Combine coverage data files
    AggregateCoverage {
        /// Coverage data files; missing ones are skipped
        #[arg(value_name = "FILES")]
        files: Vec<PathBuf>,
    },

    /// Render an HTML coverage report
    HtmlCoverage {
        /// Coverage data file
        #[arg(value_name = "FILE")]
        coverage_file: PathBuf,
    },

    /// Run unit and integration tests, then aggregate XUnit and coverage
    RunTests {
        #[command(flatten)]
        flags: RunnerFlags,
    },

    /// Generate a default .ci-bundle.toml configuration file
    InitConfig,
}

/// Flags forwarded to the integration runner.
#[derive(clap::Args, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunnerFlags {
    /// Do not collect coverage in integration runs
    #[arg(long)]
    pub no_coverage: bool,

    /// Pass --public_runs to the runner
    #[arg(long)]
    pub public_runs: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Command::RunIntegrationTests {
            test_config: None,
            tests_file: None,
            ..
        } = self.command
        {
            return Err("Must provide at least --test-config or --tests-file".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
