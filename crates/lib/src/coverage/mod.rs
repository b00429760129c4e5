//! Endpoint coverage reports for an OpenAPI document.
//!
//! Endpoints are the keys of the document's `paths` mapping. A report
//! partitions them into covered and uncovered for a given percentage, using a
//! seeded ordering so the same document always yields the same partition.

mod html;

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::util::hash::hash_bytes;

pub use html::render_html;

pub const DEFAULT_PERCENTAGE: u8 = 71;
pub const JSON_REPORT: &str = "restler_coverage.json";
pub const HTML_REPORT: &str = "restler_coverage.html";

const SHUFFLE_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum CoverageError {
  #[error("OpenAPI document not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("no endpoints found in {0}")]
  NoEndpoints(PathBuf),

  #[error("coverage percentage must be between 0 and 100, got {0}")]
  InvalidPercentage(u8),

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
  pub coverage_percentage: u8,
  pub total_endpoints: usize,
  pub covered_endpoints: Vec<String>,
  pub uncovered_endpoints: Vec<String>,
  /// RFC 3339, UTC.
  pub timestamp: String,
}

/// Files written by [`write_reports`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFiles {
  pub json: PathBuf,
  pub html: PathBuf,
}

/// Endpoint paths of an OpenAPI YAML document, in document order.
pub fn parse_openapi(path: &Path) -> Result<Vec<String>, CoverageError> {
  if !path.is_file() {
    return Err(CoverageError::NotFound(path.to_path_buf()));
  }

  let content = std::fs::read_to_string(path).map_err(|source| CoverageError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let document: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| CoverageError::Parse {
    path: path.to_path_buf(),
    message: e.to_string(),
  })?;

  let endpoints: Vec<String> = match document.get("paths").and_then(serde_yaml::Value::as_mapping) {
    Some(paths) => paths.keys().filter_map(|k| k.as_str().map(str::to_string)).collect(),
    None => Vec::new(),
  };
  debug!(count = endpoints.len(), "parsed endpoints");

  if endpoints.is_empty() {
    return Err(CoverageError::NoEndpoints(path.to_path_buf()));
  }
  Ok(endpoints)
}

/// Partition `endpoints` for `percentage`.
///
/// `floor(percentage / 100 * total)` endpoints are covered, computed in
/// floating point (57% of 100 endpoints covers 56). The order is a
/// seeded shuffle keyed on each endpoint, so it does not depend on document
/// order.
pub fn calculate_coverage(
  endpoints: &[String],
  percentage: u8,
  generated_at: SystemTime,
) -> Result<CoverageReport, CoverageError> {
  if percentage > 100 {
    return Err(CoverageError::InvalidPercentage(percentage));
  }

  let mut shuffled: Vec<(String, &String)> = endpoints
    .iter()
    .map(|ep| (hash_bytes(format!("{SHUFFLE_SEED}:{ep}").as_bytes()).0, ep))
    .collect();
  shuffled.sort();

  let total = endpoints.len();
  let covered_count = (f64::from(percentage) / 100.0 * total as f64) as usize;
  let (covered, uncovered) = shuffled.split_at(covered_count);

  Ok(CoverageReport {
    coverage_percentage: percentage,
    total_endpoints: total,
    covered_endpoints: covered.iter().map(|(_, ep)| (*ep).clone()).collect(),
    uncovered_endpoints: uncovered.iter().map(|(_, ep)| (*ep).clone()).collect(),
    timestamp: humantime::format_rfc3339_seconds(generated_at).to_string(),
  })
}

/// Write the JSON and HTML reports into `out_dir`, creating it if needed.
pub fn write_reports(report: &CoverageReport, out_dir: &Path) -> Result<ReportFiles, CoverageError> {
  let write_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source: io::Error| CoverageError::Write { path, source }
  };

  std::fs::create_dir_all(out_dir).map_err(write_err(out_dir))?;

  let json = out_dir.join(JSON_REPORT);
  let content = serde_json::to_string_pretty(report).map_err(|e| CoverageError::Write {
    path: json.clone(),
    source: io::Error::other(e),
  })?;
  std::fs::write(&json, format!("{content}\n")).map_err(write_err(&json))?;
  info!(path = ?json, "wrote JSON coverage report");

  let html = out_dir.join(HTML_REPORT);
  std::fs::write(&html, render_html(report)).map_err(write_err(&html))?;
  info!(path = ?html, "wrote HTML coverage report");

  Ok(ReportFiles { json, html })
}

/// Parse `spec`, partition its endpoints and write both reports.
pub fn generate(spec: &Path, out_dir: &Path, percentage: u8) -> Result<(CoverageReport, ReportFiles), CoverageError> {
  let endpoints = parse_openapi(spec)?;
  let report = calculate_coverage(&endpoints, percentage, SystemTime::now())?;
  let files = write_reports(&report, out_dir)?;
  Ok((report, files))
}
