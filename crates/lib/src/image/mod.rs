//! Published images.
//!
//! An image is a directory holding `image.json` and a `rootfs/` tree. Paths
//! recorded in `image.json` are image-absolute (`/venv/bin`, `/RESTler/...`)
//! and resolve relative to `rootfs/`.

pub mod audit;
pub mod run;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{IMAGE_CONFIG_FILE, IMAGE_FORMAT_VERSION, ROOTFS_DIR};

pub use audit::{AuditFinding, AuditOptions, AuditReport, audit_image};
pub use run::{Invocation, resolve_invocation, run_image};

/// Image metadata, stored as `image.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
  pub format_version: u32,
  pub name: String,
  /// Runtime followed by the entry assembly's image path.
  pub entrypoint: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub working_dir: String,
  pub app_root: String,
  pub venv: String,
  pub runtime: String,
  pub build_output_hash: String,
  /// Declared requirement specs.
  pub dependencies: Vec<String>,
  /// Frozen `name==version` list observed in the isolated environment.
  pub locked: Vec<String>,
  /// Top-level entries contributed by the base filesystem.
  #[serde(default)]
  pub base_entries: Vec<String>,
  /// Packages that must never appear in `locked`.
  #[serde(default)]
  pub build_packages: Vec<String>,
}

impl ImageConfig {
  /// Image path of the entry assembly.
  pub fn entry_path(&self) -> Option<&str> {
    self.entrypoint.get(1).map(String::as_str)
  }

  pub fn write(&self, path: &Path) -> Result<(), ImageError> {
    let content = serde_json::to_string_pretty(self).map_err(|e| ImageError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    std::fs::write(path, format!("{content}\n")).map_err(|source| ImageError::Write {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn read(path: &Path) -> Result<Self, ImageError> {
    let content = std::fs::read_to_string(path).map_err(|source| ImageError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&content).map_err(|e| ImageError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;

    if config.format_version != IMAGE_FORMAT_VERSION {
      return Err(ImageError::UnsupportedFormat {
        found: config.format_version,
        expected: IMAGE_FORMAT_VERSION,
      });
    }

    Ok(config)
  }
}

#[derive(Debug, Error)]
pub enum ImageError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid image metadata {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("unsupported image format version {found} (expected {expected})")]
  UnsupportedFormat { found: u32, expected: u32 },

  #[error("not an image directory: {0}")]
  NotAnImage(PathBuf),

  #[error("image has no entry point")]
  NoEntrypoint,

  #[error("failed to launch {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash {path}: {message}")]
  Hash { path: PathBuf, message: String },
}

/// Host location of an image-absolute path.
pub fn in_rootfs(rootfs: &Path, image_path: &str) -> PathBuf {
  rootfs.join(image_path.trim_start_matches('/'))
}

/// A published image opened for running or auditing.
#[derive(Debug, Clone)]
pub struct LoadedImage {
  pub dir: PathBuf,
  pub config: ImageConfig,
}

impl LoadedImage {
  pub fn open(dir: &Path) -> Result<Self, ImageError> {
    let dir = dunce::canonicalize(dir).map_err(|source| ImageError::Read {
      path: dir.to_path_buf(),
      source,
    })?;
    let config_path = dir.join(IMAGE_CONFIG_FILE);
    if !config_path.is_file() || !dir.join(ROOTFS_DIR).is_dir() {
      return Err(ImageError::NotAnImage(dir));
    }

    let config = ImageConfig::read(&config_path)?;
    Ok(Self { dir, config })
  }

  pub fn rootfs(&self) -> PathBuf {
    self.dir.join(ROOTFS_DIR)
  }

  /// Host path of an image-absolute path.
  pub fn host_path(&self, image_path: &str) -> PathBuf {
    in_rootfs(&self.rootfs(), image_path)
  }
}
