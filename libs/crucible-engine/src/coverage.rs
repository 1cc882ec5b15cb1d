//! Coverage artifact extraction.
//!
//! The test runner writes a coverage report inside the workspace during the
//! run; this module reads it afterwards and normalizes it to a single
//! 0-100 percentage. Coverage is best-effort telemetry: any missing,
//! malformed, or unreadable artifact yields zero, never a failure.

use anyhow::{Context, Result};
use crucible_common::Language;
use std::path::Path;
use tracing::warn;

/// Read the language-specific coverage artifact from the workspace.
/// Returns 0 (and logs) when no usable artifact exists.
pub async fn extract_coverage(language: Language, workspace_dir: &Path) -> u8 {
    match read_percentage(language, workspace_dir).await {
        Ok(percent) => percent,
        Err(e) => {
            warn!(language = %language, error = %e, "coverage artifact unavailable, reporting 0");
            0
        }
    }
}

async fn read_percentage(language: Language, workspace_dir: &Path) -> Result<u8> {
    let percent = if language.is_module_based() {
        // jest json-summary reporter
        let path = workspace_dir.join("coverage/coverage-summary.json");
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let summary: serde_json::Value = serde_json::from_str(&raw)?;
        summary
            .pointer("/total/lines/pct")
            .and_then(|v| v.as_f64())
            .context("missing total.lines.pct")?
    } else {
        // pytest-cov json report
        let path = workspace_dir.join("coverage.json");
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let report: serde_json::Value = serde_json::from_str(&raw)?;
        report
            .pointer("/totals/percent_covered")
            .and_then(|v| v.as_f64())
            .context("missing totals.percent_covered")?
    };

    Ok(percent.round().clamp(0.0, 100.0) as u8)
}
