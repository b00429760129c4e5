//! Filesystem helpers for staging sources and handing BuildOutput over.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Counts of entries written by [`copy_tree`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
  pub files: usize,
  pub dirs: usize,
}

/// Recursively copy `src` into `dst`.
///
/// `src` may be a file or a directory. Symlinks are recreated rather than
/// followed, and file permissions are preserved. Entries whose name appears
/// in `exclude` are skipped at any depth. `dst` must not exist yet unless
/// it is an empty directory.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> io::Result<CopyStats> {
  let mut stats = CopyStats::default();

  let metadata = fs::symlink_metadata(src)?;
  if !metadata.is_dir() {
    if let Some(parent) = dst.parent() {
      fs::create_dir_all(parent)?;
    }
    copy_entry(src, dst, &metadata.file_type(), &mut stats)?;
    return Ok(stats);
  }

  let walker = WalkDir::new(src)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| {
      e.depth() == 0
        || e
          .file_name()
          .to_str()
          .map(|name| !exclude.contains(&name))
          .unwrap_or(true)
    });

  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dst.join(rel);
    copy_entry(entry.path(), &target, &entry.file_type(), &mut stats)?;
  }

  Ok(stats)
}

fn copy_entry(src: &Path, dst: &Path, file_type: &fs::FileType, stats: &mut CopyStats) -> io::Result<()> {
  if file_type.is_dir() {
    fs::create_dir_all(dst)?;
    stats.dirs += 1;
  } else if file_type.is_symlink() {
    let target = fs::read_link(src)?;
    create_symlink(&target, dst)?;
  } else if file_type.is_file() {
    fs::copy(src, dst)?;
    stats.files += 1;
  }
  Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
  if resolved.is_dir() {
    std::os::windows::fs::symlink_dir(target, link)
  } else {
    std::os::windows::fs::symlink_file(target, link)
  }
}

/// Sorted names of the direct children of `dir`.
pub fn list_entries(dir: &Path) -> io::Result<Vec<String>> {
  let mut names = Vec::new();
  for entry in fs::read_dir(dir)? {
    names.push(entry?.file_name().to_string_lossy().to_string());
  }
  names.sort();
  Ok(names)
}

/// Returns true if `dir` is missing or has no entries.
pub fn is_empty_dir(dir: &Path) -> io::Result<bool> {
  match fs::read_dir(dir) {
    Ok(mut entries) => Ok(entries.next().is_none()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
    Err(e) => Err(e),
  }
}
