//! Per-item outcome ledger for one pipeline run.
//!
//! The pre-dedupe manifest has exactly one row per input file, in traversal
//! order, and is the authoritative record for failure diagnostics. The
//! final manifest lists deduplication survivors only and is what downstream
//! training consumes.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Fail,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub status: Status,
    pub reason: Option<String>,
    pub out: Option<String>,
}

impl ManifestEntry {
    pub fn ok(path: &Path, out: &Path) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            status: Status::Ok,
            reason: None,
            out: Some(out.to_string_lossy().to_string()),
        }
    }

    pub fn fail(path: &Path, reason: &str) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            status: Status::Fail,
            reason: Some(reason.to_string()),
            out: None,
        }
    }
}

/// Write the pre-dedupe manifest: one row per input file.
pub fn write_pre_dedupe(path: &Path, entries: &[ManifestEntry]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record(["path", "status", "reason", "out"])?;

    for entry in entries {
        wtr.write_record([
            entry.path.as_str(),
            entry.status.as_str(),
            entry.reason.as_deref().unwrap_or(""),
            entry.out.as_deref().unwrap_or(""),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write the final manifest: surviving output paths only.
pub fn write_final(path: &Path, out_paths: &[String]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record(["out_path"])?;
    for out in out_paths {
        wtr.write_record([out.as_str()])?;
    }

    wtr.flush()?;
    Ok(())
}
