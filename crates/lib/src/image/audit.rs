//! Checking a published image for isolation, reachability, integrity and
//! dependency minimality.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{ImageError, LoadedImage};
use crate::builder::seal::output_hash;
use crate::consts::{SEAL_MARKER, WORK_MARKER};
use crate::target::venv::LockedPackage;
use crate::util::fs::list_entries;

#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
  /// Extra top-level rootfs entries to accept.
  pub allow: Vec<String>,
  /// Extra packages that must not be installed.
  pub forbid: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditFinding {
  UnexpectedEntry { name: String },
  WorkMarker { path: String },
  SealMarkerCopied,
  EntrypointMissing { path: String },
  HashMismatch { expected: String, actual: String },
  MissingDependency { spec: String },
  ForbiddenPackage { package: String },
}

impl fmt::Display for AuditFinding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AuditFinding::UnexpectedEntry { name } => write!(f, "unexpected top-level entry /{name}"),
      AuditFinding::WorkMarker { path } => write!(f, "builder work directory reachable at {path}"),
      AuditFinding::SealMarkerCopied => write!(f, "seal marker copied into the application root"),
      AuditFinding::EntrypointMissing { path } => write!(f, "entry point {path} does not exist"),
      AuditFinding::HashMismatch { expected, actual } => {
        write!(f, "application root hash {actual} does not match build output {expected}")
      }
      AuditFinding::MissingDependency { spec } => write!(f, "declared dependency {spec} is not installed"),
      AuditFinding::ForbiddenPackage { package } => write!(f, "package {package} must not be installed"),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
  pub image: String,
  pub findings: Vec<AuditFinding>,
}

impl AuditReport {
  pub fn is_clean(&self) -> bool {
    self.findings.is_empty()
  }
}

/// Audit the image at `dir`. Findings are collected, not returned as errors.
pub fn audit_image(dir: &Path, options: &AuditOptions) -> Result<AuditReport, ImageError> {
  let image = LoadedImage::open(dir)?;
  let config = &image.config;
  let rootfs = image.rootfs();
  let mut findings = Vec::new();

  // Isolation: only the venv, the app root, base entries and allowed names.
  let mut allowed: BTreeSet<String> = config.base_entries.iter().cloned().collect();
  allowed.extend(options.allow.iter().cloned());
  for image_path in [&config.venv, &config.app_root] {
    if let Some(top) = image_path.split('/').find(|s| !s.is_empty()) {
      allowed.insert(top.to_string());
    }
  }

  let entries = list_entries(&rootfs).map_err(|source| ImageError::Read {
    path: rootfs.clone(),
    source,
  })?;
  for name in entries {
    if !allowed.contains(&name) {
      findings.push(AuditFinding::UnexpectedEntry { name });
    }
  }

  for entry in WalkDir::new(&rootfs).follow_links(false) {
    let entry = entry.map_err(|e| ImageError::Read {
      path: rootfs.clone(),
      source: std::io::Error::other(e),
    })?;
    if entry.file_name() == WORK_MARKER {
      let rel = entry.path().strip_prefix(&rootfs).unwrap_or(entry.path());
      findings.push(AuditFinding::WorkMarker {
        path: format!("/{}", rel.display()),
      });
    }
  }

  // Reachability.
  match config.entry_path() {
    Some(path) if image.host_path(path).is_file() => {}
    Some(path) => findings.push(AuditFinding::EntrypointMissing { path: path.to_string() }),
    None => findings.push(AuditFinding::EntrypointMissing { path: String::new() }),
  }

  // Integrity.
  let app_root = image.host_path(&config.app_root);
  if app_root.join(SEAL_MARKER).exists() {
    findings.push(AuditFinding::SealMarkerCopied);
  }
  let actual = output_hash(&app_root).map_err(|e| ImageError::Hash {
    path: app_root.clone(),
    message: e.to_string(),
  })?;
  if actual.0 != config.build_output_hash {
    findings.push(AuditFinding::HashMismatch {
      expected: config.build_output_hash.clone(),
      actual: actual.0,
    });
  }

  // Minimality.
  let locked: Vec<LockedPackage> = config.locked.iter().filter_map(|l| LockedPackage::parse_line(l)).collect();
  for spec in &config.dependencies {
    let (name, version) = match spec.split_once("==") {
      Some((name, version)) => (name, Some(version)),
      None => (spec.as_str(), None),
    };
    let present = locked
      .iter()
      .any(|p| p.matches(name) && version.is_none_or(|v| p.version == v));
    if !present {
      findings.push(AuditFinding::MissingDependency { spec: spec.clone() });
    }
  }
  for name in config.build_packages.iter().chain(&options.forbid) {
    if let Some(found) = locked.iter().find(|p| p.matches(name)) {
      findings.push(AuditFinding::ForbiddenPackage {
        package: found.to_string(),
      });
    }
  }

  debug!(findings = findings.len(), "audit complete");
  info!(image = %config.name, clean = findings.is_empty(), "audited image");

  Ok(AuditReport {
    image: config.name.clone(),
    findings,
  })
}
