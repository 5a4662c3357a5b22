//! ci-bundle - CI orchestration tasks
//!
//! Runs integration and unit tests through external runners, combines
//! coverage data and merges XUnit result files into one report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Any error (bad arguments, failed tests, unreadable reports, etc.)

mod cli;
mod config;
mod executor;
mod models;
mod process;
mod report;
mod scanner;
mod tasks;
mod xunit;

use anyhow::{Context, Result};
use cli::{Args, Command, RunnerFlags};
use config::{Config, DEFAULT_CONFIG_FILE};
use models::{AggregateSummary, RunContext};
use process::TokioProcessRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasks::{CiTasks, IntegrationOptions, SuiteOptions};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // init-config needs neither logging nor an existing config
    if args.command == Command::InitConfig {
        return handle_init_config();
    }

    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);
    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration ({}): {:#}", source, e);
        std::process::exit(1);
    }

    init_logging(log_level(&args, &config));

    info!("ci-bundle v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args, config).await {
        error!("{:#}", e);
        eprintln!("\nError: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle `init-config`: write a default `.ci-bundle.toml`.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to point at your runners, test directories and logs directory.");
    Ok(())
}

/// Level from the flags, falling back to the config file's `verbose`.
fn log_level(args: &Args, config: &Config) -> Level {
    if !args.quiet && config.general.verbose {
        Level::DEBUG
    } else {
        args.log_level()
    }
}

/// Initialize logging. `RUST_LOG` wins over the computed level when set.
fn init_logging(level: Level) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let result = if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(builder.with_max_level(level).finish())
    };

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or use defaults. Also returns a
/// description of where it came from, logged once logging is up.
fn load_config(args: &Args) -> Result<(Config, String)> {
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, config_path.display().to_string()));
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok((config, DEFAULT_CONFIG_FILE.to_string())),
        Ok(None) => Ok((Config::default(), "defaults".to_string())),
        Err(e) => {
            eprintln!("Warning: ignoring {}: {:#}", DEFAULT_CONFIG_FILE, e);
            Ok((Config::default(), "defaults".to_string()))
        }
    }
}

/// Dispatch the subcommand.
async fn run(args: Args, mut config: Config) -> Result<()> {
    if let Command::AggregateXunit {
        strip_system_output: true,
        ..
    } = args.command
    {
        config.xunit.strip_system_output = true;
    }

    let ctx = RunContext::new(&config.general.logs_dir)?;
    info!("Logs directory: {}", ctx.logs_dir().display());

    let tasks = CiTasks::new(ctx, config, Arc::new(TokioProcessRunner)).with_progress(!args.quiet);

    match args.command {
        Command::AggregateXunit { files, output, .. } => {
            let summary = tasks.aggregate_xunit(&files, output.as_deref())?;
            print_aggregate(&summary);
        }

        Command::CollectXunits { dir } => {
            for file in tasks.collect_xunits(dir.as_deref())? {
                println!("{}", file.display());
            }
        }

        Command::RunIntegrationTests {
            test_config,
            tests_file,
            output_dir,
            xunit_file,
            flags,
        } => {
            let (coverage, public_runs) = runner_flags(&tasks, flags);
            let run = tasks
                .run_integration_tests(&IntegrationOptions {
                    test_config,
                    tests_file,
                    output_dir,
                    xunit_file,
                    coverage,
                    public_runs,
                })
                .await?;
            println!(
                "Integration tests for {} passed in {:.1}s. Logs: {}",
                run.name,
                run.elapsed_seconds,
                run.output_dir.display()
            );
        }

        Command::RunAllIntegrationTests {
            tests_dir,
            output_dir,
            flags,
        } => {
            let (coverage, public_runs) = runner_flags(&tasks, flags);
            let result = tasks
                .run_all_integration_tests(&SuiteOptions {
                    tests_dir,
                    output_dir,
                    coverage,
                    public_runs,
                })
                .await?;
            println!("{} integration configuration(s) passed.", result.runs.len());
            for file in &result.xunit_files {
                println!("   {}", file.display());
            }
        }

        Command::RunUnitTests { tests_dir } => {
            let artifacts = tasks.run_unit_tests(tests_dir.as_deref()).await?;
            println!("Unit tests passed.");
            println!("   XUnit: {}", artifacts.xunit_file.display());
            println!("   Coverage: {}", artifacts.coverage_file.display());
        }

        Command::AggregateCoverage { files } => {
            print_optional("Coverage data", tasks.aggregate_coverage(&files).await?);
        }

        Command::HtmlCoverage { coverage_file } => {
            if tasks.generate_html_coverage(&coverage_file).await?.is_none() {
                warn!("No HTML coverage report was produced");
            }
        }

        Command::RunTests { flags } => {
            let (coverage, public_runs) = runner_flags(&tasks, flags);
            let summary = tasks
                .run_tests(&SuiteOptions {
                    coverage,
                    public_runs,
                    ..Default::default()
                })
                .await?;

            print_aggregate(&summary.xunit);
            print_optional("Coverage data", summary.coverage_file);
            println!("   Duration: {:.1}s", summary.duration_seconds);
            println!(
                "\nRun summary saved to: {}",
                tasks.context().summary_json_path().display()
            );
        }

        // handled before logging is initialized
        Command::InitConfig => {}
    }

    Ok(())
}

/// Effective `(coverage, public_runs)` for the integration runner.
fn runner_flags(tasks: &CiTasks, flags: RunnerFlags) -> (bool, bool) {
    let integration = &tasks.config().integration;
    (
        integration.coverage && !flags.no_coverage,
        integration.public_runs || flags.public_runs,
    )
}

fn print_aggregate(summary: &AggregateSummary) {
    println!("\nXUnit Summary:");
    println!("   Inputs merged: {}", summary.inputs);
    println!("   Test suites: {}", summary.suites);
    println!(
        "   Tests: {} | Passed: {} | Failures: {} | Errors: {}",
        summary.counts.tests,
        summary.counts.passed(),
        summary.counts.failures,
        summary.counts.errors
    );
    println!("   Report: {}", summary.path.display());
}

fn print_optional(label: &str, path: Option<PathBuf>) {
    match path {
        Some(path) => println!("   {}: {}", label, path.display()),
        None => println!("   {}: none", label),
    }
}
