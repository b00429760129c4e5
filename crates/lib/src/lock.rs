//! Advisory locking of an images directory.
//!
//! `build` holds an exclusive lock on `<images_dir>/.lock` while it runs so two
//! pipelines never publish side by side; `audit` takes a shared one. The lock
//! file body records who holds the exclusive lock, which is what a second
//! builder reports when it is turned away.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::LOCK_FILENAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Who holds an exclusive images lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  pub since_unix: u64,
  pub images_dir: PathBuf,
}

impl LockHolder {
  fn this_process(command: &str, images_dir: &Path) -> Self {
    let since_unix = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
    Self {
      pid: std::process::id(),
      command: command.to_owned(),
      since_unix,
      images_dir: images_dir.to_owned(),
    }
  }

  fn from_reader(mut reader: impl Read) -> Option<Self> {
    let mut body = String::new();
    reader.read_to_string(&mut body).ok()?;
    serde_json::from_str(&body).ok()
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let since = humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(self.since_unix));
    write!(f, "`{}` (PID {}, since {since})", self.command, self.pid)
  }
}

#[derive(Debug, Error)]
pub enum ImagesLockError {
  #[error(
    "images directory is in use by {holder}\n\
     remove {lock_path} only if no restpack process is running"
  )]
  Held { holder: LockHolder, lock_path: PathBuf },

  #[error(
    "images directory is in use by another process\n\
     remove {lock_path} only if no restpack process is running"
  )]
  HeldUnknown { lock_path: PathBuf },

  #[error("failed to {action} {}: {source}", path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl ImagesLockError {
  fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
    move |source| ImagesLockError::Io {
      action,
      path: path.to_owned(),
      source,
    }
  }
}

/// A held images lock. Dropping it closes the file and releases the lock.
#[derive(Debug)]
pub struct ImagesLock {
  file: File,
  lock_path: PathBuf,
}

impl ImagesLock {
  /// Lock `images_dir` without waiting, creating the directory on first use.
  pub fn acquire(images_dir: &Path, mode: LockMode, command: &str) -> Result<Self, ImagesLockError> {
    std::fs::create_dir_all(images_dir).map_err(ImagesLockError::io("create", images_dir))?;

    let lock_path = images_dir.join(LOCK_FILENAME);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(ImagesLockError::io("open", &lock_path))?;

    match sys::try_lock(&file, mode) {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
        let holder = File::open(&lock_path).ok().and_then(LockHolder::from_reader);
        return Err(match holder {
          Some(holder) => ImagesLockError::Held { holder, lock_path },
          None => ImagesLockError::HeldUnknown { lock_path },
        });
      }
      Err(err) => return Err(ImagesLockError::io("lock", &lock_path)(err)),
    }

    let mut lock = ImagesLock { file, lock_path };
    if mode == LockMode::Exclusive {
      lock.record_holder(&LockHolder::this_process(command, images_dir))?;
    }
    debug!(lock = %lock.lock_path.display(), ?mode, "acquired images lock");
    Ok(lock)
  }

  /// The holder record written by the exclusive owner.
  pub fn read_metadata(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    LockHolder::from_reader(file).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed lock file"))
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  fn record_holder(&mut self, holder: &LockHolder) -> Result<(), ImagesLockError> {
    let body = serde_json::to_vec_pretty(holder).map_err(|e| ImagesLockError::io("write", &self.lock_path)(e.into()))?;
    self
      .file
      .set_len(0)
      .and_then(|()| self.file.seek(SeekFrom::Start(0)).map(drop))
      .and_then(|()| self.file.write_all(&body))
      .and_then(|()| self.file.flush())
      .map_err(ImagesLockError::io("write", &self.lock_path))
  }
}

#[cfg(unix)]
mod sys {
  use std::fs::File;
  use std::io;
  use std::os::unix::io::AsFd;

  use rustix::fs::{FlockOperation, flock};

  use super::LockMode;

  pub fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    let op = if mode == LockMode::Exclusive {
      FlockOperation::NonBlockingLockExclusive
    } else {
      FlockOperation::NonBlockingLockShared
    };
    Ok(flock(file.as_fd(), op)?)
  }
}

#[cfg(windows)]
mod sys {
  use std::fs::File;
  use std::io;
  use std::os::windows::io::AsRawHandle;

  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  use super::LockMode;

  pub fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
    if mode == LockMode::Exclusive {
      flags |= LOCKFILE_EXCLUSIVE_LOCK;
    }

    // SAFETY: a zeroed OVERLAPPED is valid and the handle stays owned by `file`.
    let ok = unsafe {
      let mut overlapped = std::mem::zeroed();
      LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
    };
    // ERROR_LOCK_VIOLATION does not map to WouldBlock on its own.
    match ok {
      0 => {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(33) {
          Err(io::Error::from(io::ErrorKind::WouldBlock))
        } else {
          Err(err)
        }
      }
      _ => Ok(()),
    }
  }
}
