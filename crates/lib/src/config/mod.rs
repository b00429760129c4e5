//! Loading and validating `restpack.toml`.

mod types;

use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::{IMAGES_DIR_ENV, WORK_RESERVED};

pub use types::{BuilderConfig, Dependency, OutputConfig, PipelineConfig, SourceTreeConfig, TargetConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid config: {0}")]
  Invalid(String),

  #[error("dependency '{0}' has no pinned version (set target.allow_unpinned to opt in)")]
  Unpinned(String),
}

impl PipelineConfig {
  /// Load a config file, resolving relative paths against its directory.
  ///
  /// `RESTPACK_IMAGES_DIR` overrides `output.images_dir` when set.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let base_dir = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    let base_dir = dunce::canonicalize(&base_dir).unwrap_or(base_dir);

    let mut config = Self::from_toml(&content, path)?;
    config.resolve_paths(&base_dir);

    if let Ok(dir) = std::env::var(IMAGES_DIR_ENV)
      && !dir.is_empty()
    {
      debug!(images_dir = %dir, "images directory overridden from environment");
      config.output.images_dir = PathBuf::from(dir);
    }

    Ok(config)
  }

  /// Parse config content. `origin` is only used in error messages.
  pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
      path: origin.to_path_buf(),
      message: e.to_string(),
    })
  }

  /// Make every host path absolute relative to `base_dir`.
  pub fn resolve_paths(&mut self, base_dir: &Path) {
    let absolutize = |p: &mut PathBuf| {
      if p.is_relative() {
        *p = base_dir.join(&*p);
      }
    };

    absolutize(&mut self.sources.engine);
    absolutize(&mut self.sources.tools);
    absolutize(&mut self.sources.driver);
    absolutize(&mut self.output.images_dir);
    if let Some(base) = self.target.base.as_mut() {
      absolutize(base);
    }
    if let Some(work_dir) = self.builder.work_dir.as_mut() {
      absolutize(work_dir);
    }
  }

  /// Check the configuration before anything runs.
  ///
  /// `allow_unpinned` is OR-ed with `target.allow_unpinned`.
  pub fn validate(&self, allow_unpinned: bool) -> Result<(), ConfigError> {
    if self.name.is_empty() || self.name.starts_with('.') || self.name.contains(['/', '\\']) {
      return Err(ConfigError::Invalid(format!("image name '{}' is not a plain directory name", self.name)));
    }

    let mut staged_names = BTreeSet::new();
    for (part, path) in self.sources.parts() {
      let file_name = path
        .file_name()
        .ok_or_else(|| ConfigError::Invalid(format!("sources.{part} has no file name: {}", path.display())))?;
      if !staged_names.insert(file_name.to_os_string()) {
        return Err(ConfigError::Invalid(format!(
          "sources.{part} is staged as '{}', which another source part already uses",
          file_name.to_string_lossy()
        )));
      }
    }

    for (field, command) in [
      ("builder.probe", &self.builder.probe),
      ("builder.driver_command", &self.builder.driver_command),
      ("builder.bytecode_command", &self.builder.bytecode_command),
      ("target.probe", &self.target.probe),
      ("target.venv_command", &self.target.venv_command),
      ("target.pip_command", &self.target.pip_command),
      ("target.freeze_command", &self.target.freeze_command),
    ] {
      if command.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must not be empty")));
      }
    }

    let destination = &self.builder.destination;
    let first = destination.components().find_map(|c| match c {
      Component::Normal(name) => Some(name),
      _ => None,
    });
    let destination_ok = first.is_some_and(|name| !WORK_RESERVED.iter().any(|r| name == *r))
      && destination
        .components()
        .all(|c| matches!(c, Component::RootDir | Component::CurDir | Component::Normal(_)));
    if !destination_ok {
      return Err(ConfigError::Invalid(format!(
        "builder.destination {} must name a directory inside the work directory",
        destination.display()
      )));
    }

    if !is_relative_subpath(&self.builder.bytecode_dir) {
      return Err(ConfigError::Invalid(
        "builder.bytecode_dir must be a relative path inside the destination".to_string(),
      ));
    }

    let venv = image_path_components(&self.target.venv, "target.venv")?;
    let app_root = image_path_components(&self.target.app_root, "target.app_root")?;
    if venv.starts_with(&app_root) || app_root.starts_with(&venv) {
      return Err(ConfigError::Invalid(
        "target.venv and target.app_root must not contain each other".to_string(),
      ));
    }

    if !is_relative_subpath(Path::new(self.target.entry_assembly.trim_start_matches("./"))) {
      return Err(ConfigError::Invalid(
        "target.entry_assembly must be a relative path inside app_root".to_string(),
      ));
    }

    if self.target.runtime.is_empty() {
      return Err(ConfigError::Invalid("target.runtime must not be empty".to_string()));
    }

    let mut seen = BTreeSet::new();
    for dep in &self.target.dependencies {
      if dep.name.trim().is_empty() {
        return Err(ConfigError::Invalid("dependency with empty name".to_string()));
      }
      if !seen.insert(normalize_package_name(&dep.name)) {
        return Err(ConfigError::Invalid(format!("dependency '{}' declared twice", dep.name)));
      }
      if dep.version.is_none() && !(allow_unpinned || self.target.allow_unpinned) {
        return Err(ConfigError::Unpinned(dep.name.clone()));
      }
    }

    Ok(())
  }
}

/// Normalise a package name the way package indexes compare them:
/// lowercase, with runs of `-`, `_` and `.` collapsed to `-`.
pub fn normalize_package_name(name: &str) -> String {
  let mut normalized = String::with_capacity(name.len());
  let mut last_was_separator = false;
  for c in name.trim().chars() {
    if matches!(c, '-' | '_' | '.') {
      if !last_was_separator {
        normalized.push('-');
      }
      last_was_separator = true;
    } else {
      normalized.push(c.to_ascii_lowercase());
      last_was_separator = false;
    }
  }
  normalized
}

fn is_relative_subpath(path: &Path) -> bool {
  !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Split an absolute image path into its normal components.
fn image_path_components(path: &str, field: &str) -> Result<Vec<String>, ConfigError> {
  if !path.starts_with('/') {
    return Err(ConfigError::Invalid(format!("{field} must be an absolute image path")));
  }
  let parts: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
  if parts.is_empty() || parts.iter().any(|p| p == "." || p == "..") {
    return Err(ConfigError::Invalid(format!("{field} must name a directory below /")));
  }
  Ok(parts)
}
