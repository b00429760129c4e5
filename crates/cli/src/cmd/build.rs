//! Implementation of the `restpack build` command.
//!
//! Loads the pipeline configuration, runs both stages and reports each step.
//! Exits non-zero when any step fails; in that case nothing is published.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use restpack_lib::config::PipelineConfig;
use restpack_lib::pipeline::{PipelineOptions, run_pipeline};

use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_json, print_stat, print_step, print_success,
  short_hash,
};

pub fn cmd_build(config_path: &Path, keep_work: bool, allow_unpinned: bool, output: OutputFormat) -> Result<ExitCode> {
  let start = Instant::now();

  let config = PipelineConfig::load(config_path)
    .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
  debug!(config = %config_path.display(), images_dir = %config.output.images_dir.display(), "loaded pipeline config");
  let options = PipelineOptions {
    keep_work,
    allow_unpinned,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(run_pipeline(&config, &options)).context("Build failed")?;

  if output.is_json() {
    let failure = report.failure.as_ref().map(|f| {
      serde_json::json!({ "step": f.step, "kind": f.error.kind(), "error": f.error.to_string() })
    });
    print_json(&serde_json::json!({
      "name": config.name,
      "success": report.is_success(),
      "report": report,
      "failure": failure,
    }))?;
  } else {
    for record in &report.steps {
      print_step(record);
    }
    println!();

    if let Some(failure) = &report.failure {
      print_error(&format!("Step {} failed ({})", failure.step, failure.error.kind()));
      eprintln!("{}", failure.error);
    } else {
      print_success(&format!("Built image {}", config.name));
      if let Some(image) = &report.image {
        print_stat("Image", &image.display().to_string());
      }
      if let Some(hash) = &report.build_output_hash {
        print_stat("Build output", short_hash(hash));
      }
    }

    if let Some(work) = &report.work_dir {
      print_info(&format!("Work directory kept at {}", work.display()));
    }
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(if report.is_success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}
