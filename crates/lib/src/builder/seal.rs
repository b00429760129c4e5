//! Sealing BuildOutput.
//!
//! Once the builder stage completes, BuildOutput is hashed and a marker file
//! recording that hash is written at its root. The marker is excluded from
//! the hash and is never copied into an image.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::consts::SEAL_MARKER;
use crate::util::hash::{ContentHash, DirHashError, hash_directory};

const SEAL_VERSION: u32 = 1;

/// Contents of the seal marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealMarker {
  pub version: u32,
  /// Full 64-character SHA-256 of BuildOutput, marker excluded.
  pub output_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SealError {
  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("failed to write seal marker: {0}")]
  Write(#[source] std::io::Error),

  #[error("failed to read seal marker: {0}")]
  Read(#[source] std::io::Error),

  #[error("failed to parse seal marker: {0}")]
  Parse(#[source] serde_json::Error),
}

/// Hash of a BuildOutput tree, ignoring any seal marker inside it.
pub fn output_hash(path: &Path) -> Result<ContentHash, DirHashError> {
  hash_directory(path, &[SEAL_MARKER])
}

/// Hash `dest` and write the seal marker into it.
pub async fn seal(dest: &Path) -> Result<ContentHash, SealError> {
  let hash = output_hash(dest)?;

  let marker = SealMarker {
    version: SEAL_VERSION,
    output_hash: hash.0.clone(),
  };
  let content = serde_json::to_string(&marker).map_err(SealError::Parse)?;
  fs::write(dest.join(SEAL_MARKER), format!("{content}\n"))
    .await
    .map_err(SealError::Write)?;

  Ok(hash)
}

/// Read the seal marker, `None` if the output was never sealed.
pub fn read_seal(dest: &Path) -> Result<Option<SealMarker>, SealError> {
  let marker_path = dest.join(SEAL_MARKER);
  if !marker_path.exists() {
    return Ok(None);
  }

  let content = std::fs::read_to_string(&marker_path).map_err(SealError::Read)?;
  let marker = serde_json::from_str(&content).map_err(SealError::Parse)?;
  Ok(Some(marker))
}
