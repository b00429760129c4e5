//! Bytecode postcondition checks.
//!
//! Compiled files live beside their sources (`x.py` -> `x.pyc`). The set of
//! sources is recorded right after the driver runs; after compilation every
//! one of them must have bytecode and no bytecode may exist without one.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

const SOURCE_EXT: &str = "py";
const COMPILED_EXT: &str = "pyc";
const CACHE_DIR: &str = "__pycache__";

/// Scripts and compiled files under a directory, as relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytecodeInventory {
  pub sources: BTreeSet<PathBuf>,
  pub compiled: BTreeSet<PathBuf>,
}

impl BytecodeInventory {
  /// Walk `dir`, skipping interpreter cache directories.
  pub fn scan(dir: &Path) -> io::Result<Self> {
    let mut inventory = Self::default();

    let walker = WalkDir::new(dir)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| e.file_name() != CACHE_DIR);

    for entry in walker {
      let entry = entry.map_err(io::Error::other)?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = entry.path().strip_prefix(dir).map_err(io::Error::other)?.to_path_buf();
      match rel.extension().and_then(|e| e.to_str()) {
        Some(SOURCE_EXT) => {
          inventory.sources.insert(rel);
        }
        Some(COMPILED_EXT) => {
          inventory.compiled.insert(rel);
        }
        _ => {}
      }
    }

    Ok(inventory)
  }

  /// Compare this (post-compile) inventory against the sources recorded
  /// before compilation.
  pub fn verify_against(&self, expected_sources: &BTreeSet<PathBuf>) -> Result<usize, BytecodeMismatch> {
    let expected_compiled: BTreeSet<PathBuf> =
      expected_sources.iter().map(|s| s.with_extension(COMPILED_EXT)).collect();

    let missing: Vec<PathBuf> = expected_sources
      .iter()
      .filter(|s| !self.compiled.contains(&s.with_extension(COMPILED_EXT)))
      .cloned()
      .collect();
    let unexpected: Vec<PathBuf> = self.compiled.difference(&expected_compiled).cloned().collect();

    if missing.is_empty() && unexpected.is_empty() {
      Ok(expected_sources.len())
    } else {
      Err(BytecodeMismatch { missing, unexpected })
    }
  }
}

/// Sources without bytecode and bytecode without a recorded source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeMismatch {
  pub missing: Vec<PathBuf>,
  pub unexpected: Vec<PathBuf>,
}

impl fmt::Display for BytecodeMismatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let list = |paths: &[PathBuf]| paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ");

    let mut parts = Vec::new();
    if !self.missing.is_empty() {
      parts.push(format!("no bytecode for {}", list(&self.missing)));
    }
    if !self.unexpected.is_empty() {
      parts.push(format!("bytecode without source {}", list(&self.unexpected)));
    }
    f.write_str(&parts.join("; "))
  }
}
