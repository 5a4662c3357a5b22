//! The full `run-tests` pipeline.

use super::{CiTasks, SuiteOptions};
use crate::models::{seconds_between, PipelineSummary};
use crate::report;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use tracing::info;

impl CiTasks {
    /// Run unit and integration tests concurrently, then aggregate XUnit
    /// results and coverage concurrently. Writes JSON and Markdown run
    /// summaries into the logs directory.
    pub async fn run_tests(&self, opts: &SuiteOptions) -> Result<PipelineSummary> {
        let started_at = Utc::now();

        let (unit, integration) = tokio::join!(
            self.run_unit_tests(None),
            self.run_all_integration_tests(opts)
        );
        let unit = unit?;
        let integration = integration?;

        let mut xunit_files = vec![unit.xunit_file.clone()];
        xunit_files.extend(integration.xunit_files.iter().cloned());

        let mut coverage_files = vec![unit.coverage_file.clone()];
        coverage_files.extend(integration.coverage_files.iter().cloned());

        // aggregation is blocking file I/O; keep it off the runtime workers
        let aggregation = {
            let tasks = self.clone();
            tokio::task::spawn_blocking(move || tasks.aggregate_xunit(&xunit_files, None))
        };
        let (xunit, coverage) = tokio::join!(aggregation, self.coverage_report(&coverage_files));
        let xunit = xunit
            .context("XUnit aggregation task did not complete")?
            .context("Failed to aggregate XUnit results")?;
        let (coverage_file, coverage_index) = coverage?;

        let finished_at = Utc::now();
        let summary = PipelineSummary {
            logs_dir: self.ctx.logs_dir().to_path_buf(),
            started_at,
            finished_at,
            duration_seconds: seconds_between(started_at, finished_at),
            unit,
            integration,
            xunit,
            coverage_file,
            coverage_index,
        };

        report::write_report(
            &self.ctx.summary_json_path(),
            &report::generate_json_summary(&summary)?,
        )?;
        report::write_report(
            &self.ctx.summary_markdown_path(),
            &report::generate_markdown_summary(&summary),
        )?;
        info!("Run summary written to {}", self.ctx.summary_json_path().display());

        Ok(summary)
    }

    /// Combine coverage data, then render it.
    async fn coverage_report(
        &self,
        coverage_files: &[PathBuf],
    ) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
        match self.aggregate_coverage(coverage_files).await? {
            Some(dat) => {
                let index = self.generate_html_coverage(&dat).await?;
                Ok((Some(dat), index))
            }
            None => Ok((None, None)),
        }
    }
}
