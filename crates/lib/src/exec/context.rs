//! Scoped execution contexts.
//!
//! An `ExecContext` is the complete environment a child process sees: its
//! variables and working directory. Adjusting the search path produces a new
//! context instead of touching process-wide state, so one step's PATH never
//! leaks into another.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::consts::SOURCE_DATE_EPOCH;

#[cfg(unix)]
const PATH_SEPARATOR: char = ':';
#[cfg(windows)]
const PATH_SEPARATOR: char = ';';

/// Default search path for isolated steps on a minimal Linux base.
pub fn default_search_path() -> Vec<PathBuf> {
  ["/usr/local/sbin", "/usr/local/bin", "/usr/sbin", "/usr/bin", "/sbin", "/bin"]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
  env: BTreeMap<String, String>,
  cwd: PathBuf,
}

impl ExecContext {
  /// Create an isolated context.
  ///
  /// - PATH is exactly `search_path`
  /// - HOME and TMPDIR/TMP/TEMP point at the given scratch directories
  /// - locale is `C` and SOURCE_DATE_EPOCH is fixed for reproducible output
  /// - PYTHONHASHSEED is pinned so bytecode and set ordering are stable
  pub fn isolated(cwd: &Path, search_path: &[PathBuf], home: &Path, tmp: &Path) -> Self {
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), join_paths(search_path));
    env.insert("HOME".to_string(), home.to_string_lossy().to_string());
    for var in ["TMPDIR", "TMP", "TEMP"] {
      env.insert(var.to_string(), tmp.to_string_lossy().to_string());
    }
    env.insert("LANG".to_string(), "C".to_string());
    env.insert("LC_ALL".to_string(), "C".to_string());
    env.insert("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string());
    env.insert("PYTHONHASHSEED".to_string(), "0".to_string());

    Self {
      env,
      cwd: cwd.to_path_buf(),
    }
  }

  pub fn with_var(mut self, key: &str, value: impl Into<String>) -> Self {
    self.env.insert(key.to_string(), value.into());
    self
  }

  pub fn with_cwd(mut self, cwd: &Path) -> Self {
    self.cwd = cwd.to_path_buf();
    self
  }

  /// Returns a copy of this context with `dir` searched before any existing
  /// PATH entry.
  pub fn with_path_prepended(&self, dir: &Path) -> Self {
    let mut entries = vec![dir.to_path_buf()];
    entries.extend(self.search_path());

    let mut next = self.clone();
    next.env.insert("PATH".to_string(), join_paths(&entries));
    next
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  pub fn var(&self, key: &str) -> Option<&str> {
    self.env.get(key).map(String::as_str)
  }

  pub fn cwd(&self) -> &Path {
    &self.cwd
  }

  pub fn search_path(&self) -> Vec<PathBuf> {
    self
      .var("PATH")
      .map(|p| p.split(PATH_SEPARATOR).filter(|s| !s.is_empty()).map(PathBuf::from).collect())
      .unwrap_or_default()
  }

  /// Locate `program` the way the child would.
  ///
  /// Paths containing a separator are checked as-is (relative ones against
  /// the working directory); bare names are searched in this context's PATH.
  pub fn resolve_program(&self, program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
      let path = if candidate.is_absolute() {
        candidate.to_path_buf()
      } else {
        self.cwd.join(candidate)
      };
      return path.is_file().then_some(path);
    }

    self
      .search_path()
      .into_iter()
      .map(|dir| dir.join(program))
      .find(|path| path.is_file())
  }
}

pub(crate) fn join_paths(entries: &[PathBuf]) -> String {
  entries
    .iter()
    .map(|p| p.to_string_lossy().to_string())
    .collect::<Vec<_>>()
    .join(&PATH_SEPARATOR.to_string())
}
