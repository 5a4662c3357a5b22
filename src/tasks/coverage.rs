//! Coverage data combination and HTML rendering.

use super::unit::COVERAGE_FILE_ENV;
use super::{log_captured_output, CiTasks};
use crate::models::absolute;
use crate::process::{run_checked, CommandSpec};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

impl CiTasks {
    /// Combine the coverage data files that exist into
    /// `<logs_dir>/aggregated_coverage.dat`.
    ///
    /// Returns `None` when none of the inputs exist or the tool produced
    /// no output.
    pub async fn aggregate_coverage(&self, coverage_files: &[PathBuf]) -> Result<Option<PathBuf>> {
        let mut existing = Vec::new();
        for file in coverage_files {
            if file.exists() {
                existing.push(absolute(file)?);
            } else {
                debug!("Skipping missing coverage file {}", file.display());
            }
        }

        if existing.is_empty() {
            warn!("No coverage data files to combine");
            return Ok(None);
        }

        fs::create_dir_all(self.ctx.logs_dir()).with_context(|| {
            format!("Failed to create {}", self.ctx.logs_dir().display())
        })?;

        let aggregated = self.ctx.aggregated_coverage_path();
        let spec = CommandSpec::new(&self.config.coverage.program)
            .arg("combine")
            .args(existing.iter().map(|f| f.to_string_lossy().into_owned()))
            .current_dir(self.ctx.logs_dir())
            .env(COVERAGE_FILE_ENV, aggregated.to_string_lossy());

        info!("Combining {} coverage data file(s)", existing.len());
        if let Err(err) = run_checked(self.runner.as_ref(), &spec).await {
            log_captured_output(&err);
            return Err(anyhow::Error::new(err).context("Failed to combine coverage data"));
        }

        Ok(aggregated.exists().then_some(aggregated))
    }

    /// Render an HTML report for `coverage_file` into `<logs_dir>/htmlcov`.
    ///
    /// Returns the absolute path of the report index when it was produced.
    pub async fn generate_html_coverage(&self, coverage_file: &Path) -> Result<Option<PathBuf>> {
        if !coverage_file.exists() {
            bail!("{} does not exist", coverage_file.display());
        }
        let coverage_file = absolute(coverage_file)?;

        let spec = CommandSpec::new(&self.config.coverage.program)
            .args(["html", "--title", self.config.coverage.html_title.as_str()])
            .current_dir(self.ctx.logs_dir())
            .env(COVERAGE_FILE_ENV, coverage_file.to_string_lossy());

        if let Err(err) = run_checked(self.runner.as_ref(), &spec).await {
            log_captured_output(&err);
            return Err(anyhow::Error::new(err).context("Failed to generate HTML coverage"));
        }

        let index = self.ctx.coverage_index_path();
        if index.exists() {
            println!("View Coverage at: {}", index.display());
            info!("Coverage report written to {}", index.display());
            Ok(Some(index))
        } else {
            warn!("Coverage tool did not produce {}", index.display());
            Ok(None)
        }
    }
}
