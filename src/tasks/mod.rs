//! CI tasks.
//!
//! Every task runs against a [`RunContext`] and reaches the outside world
//! only through the injected [`ProcessRunner`] and [`ParallelExecutor`].

pub mod coverage;
pub mod integration;
pub mod pipeline;
pub mod unit;
pub mod xunit;

pub use integration::{IntegrationOptions, SuiteOptions};

use crate::config::Config;
use crate::executor::ParallelExecutor;
use crate::models::RunContext;
use crate::process::{ProcessError, ProcessRunner};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing::{error, info};

/// Entry point for all CI tasks of one run.
#[derive(Clone)]
pub struct CiTasks {
    ctx: RunContext,
    config: Config,
    runner: Arc<dyn ProcessRunner>,
    executor: ParallelExecutor,
    show_progress: bool,
}

impl CiTasks {
    pub fn new(ctx: RunContext, config: Config, runner: Arc<dyn ProcessRunner>) -> Self {
        let executor = ParallelExecutor::new(config.general.concurrency);
        Self {
            ctx,
            config,
            runner,
            executor,
            show_progress: false,
        }
    }

    /// Show a progress bar while integration configurations run.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} configs")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Log what a failed command printed before it died.
pub(crate) fn log_captured_output(err: &ProcessError) {
    if let Some((stdout, stderr)) = err.captured_output() {
        if !stdout.is_empty() {
            error!("Stdout:\n{}", stdout);
        }
        if !stderr.is_empty() {
            error!("Stderr:\n{}", stderr);
        }
    }
}

/// Log what a successful command printed.
pub(crate) fn log_output(stdout: &str, stderr: &str) {
    if !stdout.is_empty() {
        info!("Stdout:\n{}", stdout);
    }
    if !stderr.is_empty() {
        info!("Stderr:\n{}", stderr);
    }
}
