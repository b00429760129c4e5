//! Implementation of the `restpack audit` command.
//!
//! Inspects a published image without running it. Any finding makes the
//! command exit non-zero.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use restpack_lib::consts::LOCK_FILENAME;
use restpack_lib::image::audit::{AuditOptions, audit_image};
use restpack_lib::lock::{ImagesLock, LockMode};

use crate::output::{OutputFormat, print_json, print_success, print_warning};

pub fn cmd_audit(image: &Path, allow: Vec<String>, forbid: Vec<String>, output: OutputFormat) -> Result<ExitCode> {
  // Only images inside a managed images directory can be mid-publish.
  let _lock = match image.parent() {
    Some(images_dir) if images_dir.join(LOCK_FILENAME).exists() => Some(
      ImagesLock::acquire(images_dir, LockMode::Shared, "audit").context("Failed to acquire images lock")?,
    ),
    _ => None,
  };

  let options = AuditOptions { allow, forbid };
  let report = audit_image(image, &options).with_context(|| format!("Failed to audit image: {}", image.display()))?;

  if output.is_json() {
    print_json(&serde_json::json!({
      "image": report.image,
      "clean": report.is_clean(),
      "findings": report.findings,
    }))?;
  } else if report.is_clean() {
    print_success(&format!("Image {} passed audit", report.image));
  } else {
    for finding in &report.findings {
      print_warning(&finding.to_string());
    }
    println!("{} finding(s) in image {}", report.findings.len(), report.image);
  }

  Ok(if report.is_clean() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}
