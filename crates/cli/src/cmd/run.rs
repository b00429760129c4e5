//! Implementation of the `restpack run` command.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use restpack_lib::image::run::run_image;

/// Run the image entry point and exit with its exit code.
pub fn cmd_run(image: &Path, args: &[String]) -> Result<ExitCode> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let code = rt
    .block_on(run_image(image, args))
    .with_context(|| format!("Failed to run image: {}", image.display()))?;

  Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
