//! SHA-256 digests of build outputs and small strings.
//!
//! A build output is hashed as a tree: every entry contributes one line naming
//! its kind, its `/`-separated relative path and, for files and links, the
//! digest of its content or target. Timestamps and permissions never enter the
//! digest, so rebuilding identical sources reproduces the same hash.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Lowercase hex SHA-256, 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
  fn of(hasher: Sha256) -> Self {
    ContentHash(format!("{:x}", hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk {}: {source}", root.display())]
  Walk {
    root: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to hash {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Digest the tree under `root`, skipping any entry whose name is in `exclude`
/// (at any depth, together with everything below it).
pub fn hash_directory(root: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let walker = WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_name().to_str().is_none_or(|name| !exclude.contains(&name)));

  let mut lines = Vec::new();
  for entry in walker {
    let entry = entry.map_err(|source| DirHashError::Walk {
      root: root.to_owned(),
      source,
    })?;
    let rel = entry
      .path()
      .strip_prefix(root)
      .unwrap_or(entry.path())
      .to_string_lossy()
      .replace('\\', "/");

    let kind = entry.file_type();
    let line = if kind.is_dir() {
      format!("D:{rel}")
    } else if kind.is_file() {
      format!("F:{rel}:{}", hash_file(entry.path())?)
    } else if kind.is_symlink() {
      let target = std::fs::read_link(entry.path()).map_err(|source| DirHashError::Read {
        path: entry.path().to_owned(),
        source,
      })?;
      format!("L:{rel}:{}", hash_bytes(target.to_string_lossy().as_bytes()))
    } else {
      continue;
    };
    lines.push(line);
  }

  // Order by path, not by traversal.
  lines.sort_unstable_by(|a, b| a[2..].cmp(&b[2..]));

  let mut hasher = Sha256::new();
  for line in &lines {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }
  Ok(ContentHash::of(hasher))
}

/// Stream a single file through SHA-256.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_err = |source| DirHashError::Read {
    path: path.to_owned(),
    source,
  };
  let mut file = File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_err)?;
  Ok(ContentHash::of(hasher))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::of(Sha256::new_with_prefix(data))
}
