//! Copies of the last fetched report, overwritten on every fetch.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::report;
use crate::types::ScanResult;

pub const REPORT_JSON: &str = "scanctl-report.json";
pub const REPORT_HTML: &str = "scanctl-report.html";

/// Paths of the files written by [`persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub json: PathBuf,
    pub html: PathBuf,
}

/// Write the result as pretty JSON and as the rendered document into `dir`.
pub fn persist(dir: &Path, result: &ScanResult, generated_at: &str) -> Result<Artifacts> {
    let json = dir.join(REPORT_JSON);
    let html = dir.join(REPORT_HTML);

    let file = File::create(&json)
        .with_context(|| format!("failed to create {}", json.display()))?;
    serde_json::to_writer_pretty(file, result)
        .with_context(|| format!("failed to write {}", json.display()))?;

    std::fs::write(&html, report::render(result, generated_at))
        .with_context(|| format!("failed to write {}", html.display()))?;

    info!(json = %json.display(), html = %html.display(), "report artifacts written");
    Ok(Artifacts { json, html })
}
