//! Atomic publication of a staged image directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

/// Create an empty staging directory for `name` inside `images_dir`.
///
/// Staging next to the final location keeps publication a same-filesystem
/// rename. The directory is removed when the returned guard drops.
pub fn create_staging(images_dir: &Path, name: &str) -> io::Result<TempDir> {
  fs::create_dir_all(images_dir)?;
  tempfile::Builder::new()
    .prefix(&format!(".{name}.staging-"))
    .tempdir_in(images_dir)
}

/// Move `staging` to `final_dir`, replacing any previous image.
///
/// The previous image is moved aside first and only deleted once the new one
/// is in place; if the final rename fails it is restored.
pub fn publish(staging: TempDir, final_dir: &Path) -> io::Result<PathBuf> {
  let previous = if final_dir.exists() {
    let file_name = final_dir
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_default();
    let aside = final_dir.with_file_name(format!(".{file_name}.old-{}", std::process::id()));
    if aside.exists() {
      fs::remove_dir_all(&aside)?;
    }
    fs::rename(final_dir, &aside)?;
    debug!(previous = ?aside, "moved previous image aside");
    Some(aside)
  } else {
    None
  };

  let staged = staging.keep();
  if let Err(err) = fs::rename(&staged, final_dir) {
    if let Some(aside) = &previous
      && let Err(restore) = fs::rename(aside, final_dir)
    {
      warn!(error = %restore, previous = ?aside, "failed to restore previous image");
    }
    if let Err(cleanup) = fs::remove_dir_all(&staged) {
      warn!(error = %cleanup, staging = ?staged, "failed to remove staging directory");
    }
    return Err(err);
  }

  if let Some(aside) = previous
    && let Err(err) = fs::remove_dir_all(&aside)
  {
    warn!(error = %err, previous = ?aside, "failed to remove previous image");
  }

  Ok(final_dir.to_path_buf())
}
