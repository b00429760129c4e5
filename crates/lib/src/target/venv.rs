//! The isolated environment's installed package set.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Dependency, normalize_package_name};

/// One package observed in the isolated environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
  pub name: String,
  /// Exact version, or the direct reference for `name @ url` entries.
  pub version: String,
}

impl LockedPackage {
  /// Parse one line of freeze output. Blank lines, comments, options and
  /// editable installs yield `None`.
  pub fn parse_line(line: &str) -> Option<Self> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
      return None;
    }

    let (name, version) = if let Some((name, version)) = line.split_once("==") {
      (name, version)
    } else if let Some((name, reference)) = line.split_once(" @ ") {
      (name, reference)
    } else {
      debug!(line, "ignoring unrecognised freeze line");
      return None;
    };

    let name = name.trim();
    let version = version.trim();
    if name.is_empty() || version.is_empty() {
      return None;
    }

    Some(Self {
      name: name.to_string(),
      version: version.to_string(),
    })
  }

  pub fn matches(&self, name: &str) -> bool {
    normalize_package_name(&self.name) == normalize_package_name(name)
  }
}

impl fmt::Display for LockedPackage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}=={}", self.name, self.version)
  }
}

/// Parse full freeze output, sorted by normalised name.
pub fn parse_freeze(output: &str) -> Vec<LockedPackage> {
  let mut packages: Vec<LockedPackage> = output.lines().filter_map(LockedPackage::parse_line).collect();
  packages.sort_by_key(|p| normalize_package_name(&p.name));
  packages
}

/// Check the installed set: every declared dependency present at its pinned
/// version, and no build-only package present.
///
/// Returns one message per problem.
pub fn check_locked(declared: &[Dependency], build_only: &[String], locked: &[LockedPackage]) -> Vec<String> {
  let mut problems = Vec::new();

  for dep in declared {
    match locked.iter().find(|p| p.matches(&dep.name)) {
      None => problems.push(format!("declared package {} is not installed", dep.name)),
      Some(found) => {
        if let Some(version) = &dep.version
          && &found.version != version
        {
          problems.push(format!(
            "{} installed at {}, expected {}",
            dep.name, found.version, version
          ));
        }
      }
    }
  }

  for name in build_only {
    if let Some(found) = locked.iter().find(|p| p.matches(name)) {
      problems.push(format!("build-only package {found} is present in the runtime environment"));
    }
  }

  problems
}

/// Rewrite `from` to `to` in the text scripts directly under `bin`.
///
/// Environment tools bake the environment's absolute location into script
/// shebangs and activation scripts; the environment is built in a staging
/// directory and published elsewhere. Symlinks and non-UTF-8 files are left
/// alone. Returns how many files changed.
pub fn relocate_scripts(bin: &Path, from: &Path, to: &Path) -> io::Result<usize> {
  let (from, to) = (from.to_string_lossy(), to.to_string_lossy());
  let mut changed = 0;
  for entry in fs::read_dir(bin)? {
    let entry = entry?;
    if !entry.file_type()?.is_file() {
      continue;
    }
    let path = entry.path();
    let Ok(text) = String::from_utf8(fs::read(&path)?) else {
      continue;
    };
    if text.contains(from.as_ref()) {
      fs::write(&path, text.replace(from.as_ref(), &to))?;
      changed += 1;
    }
  }
  debug!(bin = %bin.display(), changed, "relocated environment scripts");
  Ok(changed)
}
