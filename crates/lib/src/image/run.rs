//! Running an image's entry point.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::{ImageError, LoadedImage};

/// Fully resolved host-side process for an image's entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: PathBuf,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub cwd: PathBuf,
}

/// Map the entry point onto the host.
///
/// Image-absolute paths that exist under `rootfs/` are rewritten to their
/// host location. PATH entries missing from `rootfs/` are kept as-is and
/// resolve against the host's base runtime.
pub fn resolve_invocation(image: &LoadedImage, extra_args: &[String]) -> Result<Invocation, ImageError> {
  let (program, entry_args) = image.config.entrypoint.split_first().ok_or(ImageError::NoEntrypoint)?;

  let map = |value: &str| -> String {
    if value.starts_with('/') {
      let host = image.host_path(value);
      if host.exists() {
        return host.to_string_lossy().to_string();
      }
    }
    value.to_string()
  };

  let mut env = BTreeMap::new();
  for (key, value) in &image.config.env {
    let mapped = if key == "PATH" {
      value.split(':').filter(|s| !s.is_empty()).map(map).collect::<Vec<_>>().join(":")
    } else {
      map(value)
    };
    env.insert(key.clone(), mapped);
  }
  if !env.contains_key("HOME")
    && let Ok(home) = std::env::var("HOME")
  {
    env.insert("HOME".to_string(), home);
  }

  let search_path: Vec<PathBuf> = env
    .get("PATH")
    .map(|p| p.split(':').map(PathBuf::from).collect())
    .unwrap_or_default();
  let program = resolve_program(&map(program), &search_path);

  let mut args: Vec<String> = entry_args.iter().map(|a| map(a)).collect();
  args.extend(extra_args.iter().cloned());

  let working_dir = image.host_path(&image.config.working_dir);
  let cwd = if working_dir.is_dir() { working_dir } else { image.rootfs() };

  Ok(Invocation { program, args, env, cwd })
}

fn resolve_program(program: &str, search_path: &[PathBuf]) -> PathBuf {
  let candidate = Path::new(program);
  if candidate.components().count() > 1 {
    return candidate.to_path_buf();
  }
  search_path
    .iter()
    .map(|dir| dir.join(program))
    .find(|p| p.is_file())
    .unwrap_or_else(|| candidate.to_path_buf())
}

/// Run the entry point of the image at `dir`, forwarding `args`.
///
/// stdio is inherited. Returns the child's exit code; termination by signal
/// maps to `128 + signal`.
pub async fn run_image(dir: &Path, args: &[String]) -> Result<i32, ImageError> {
  let image = LoadedImage::open(dir)?;
  let invocation = resolve_invocation(&image, args)?;

  info!(image = %image.config.name, program = ?invocation.program, "running entry point");
  debug!(args = ?invocation.args, cwd = ?invocation.cwd, "entry point invocation");

  let status = Command::new(&invocation.program)
    .args(&invocation.args)
    .current_dir(&invocation.cwd)
    .env_clear()
    .envs(&invocation.env)
    .stdin(Stdio::inherit())
    .stdout(Stdio::inherit())
    .stderr(Stdio::inherit())
    .status()
    .await
    .map_err(|source| ImageError::Spawn {
      program: invocation.program.display().to_string(),
      source,
    })?;

  Ok(exit_code(status))
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
  use std::os::unix::process::ExitStatusExt;
  status.code().or_else(|| status.signal().map(|s| 128 + s)).unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
  status.code().unwrap_or(1)
}
