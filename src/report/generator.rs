//! Run summary generation.
//!
//! Renders a [`PipelineSummary`] as Markdown for humans and as JSON for
//! downstream tooling.

use crate::models::{IntegrationSuiteResult, PipelineSummary, ResultCounts};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Generate a Markdown summary of a pipeline run.
pub fn generate_markdown_summary(summary: &PipelineSummary) -> String {
    let mut output = String::new();

    output.push_str("# CI Run Summary\n\n");
    output.push_str(&generate_metadata_section(summary));
    output.push_str(&generate_results_section(&summary.xunit.counts));
    output.push_str(&generate_integration_section(&summary.integration));
    output.push_str(&generate_artifacts_section(summary));

    output
}

fn generate_metadata_section(summary: &PipelineSummary) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Logs:** `{}`\n", summary.logs_dir.display()));
    section.push_str(&format!(
        "- **Started:** {}\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Duration:** {:.1}s\n", summary.duration_seconds));
    section.push_str(&format!("- **XUnit files merged:** {}\n", summary.xunit.inputs));
    section.push_str(&format!("- **Test suites:** {}\n\n", summary.xunit.suites));

    section
}

fn generate_results_section(counts: &ResultCounts) -> String {
    let mut section = String::new();

    section.push_str("## Results\n\n");
    section.push_str("| Passed | Failures | Errors | **Total** |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** |\n\n",
        counts.passed(),
        counts.failures,
        counts.errors,
        counts.tests
    ));

    if counts.is_green() {
        section.push_str("All test-cases passed.\n\n");
    }

    section
}

fn generate_integration_section(integration: &IntegrationSuiteResult) -> String {
    if integration.runs.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Integration Configurations\n\n");
    section.push_str("| Configuration | Duration | Logs |\n");
    section.push_str("|:---|:---:|:---|\n");

    let mut runs: Vec<_> = integration.runs.iter().collect();
    runs.sort_by(|a, b| a.name.cmp(&b.name));

    for run in runs {
        section.push_str(&format!(
            "| {} | {:.1}s | `{}` |\n",
            run.name,
            run.elapsed_seconds,
            run.output_dir.display()
        ));
    }
    section.push('\n');

    section
}

fn generate_artifacts_section(summary: &PipelineSummary) -> String {
    let mut section = String::new();

    section.push_str("## Artifacts\n\n");
    section.push_str(&format!(
        "- **Aggregated XUnit:** `{}`\n",
        summary.xunit.path.display()
    ));
    match summary.coverage_file {
        Some(ref dat) => section.push_str(&format!("- **Coverage data:** `{}`\n", dat.display())),
        None => section.push_str("- **Coverage data:** none\n"),
    }
    if let Some(ref index) = summary.coverage_index {
        section.push_str(&format!("- **Coverage report:** `{}`\n", index.display()));
    }
    section.push('\n');

    section
}

/// Generate a JSON summary.
pub fn generate_json_summary(summary: &PipelineSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(Into::into)
}

/// Write rendered report content to `path`, creating its parent directory.
pub fn write_report(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
