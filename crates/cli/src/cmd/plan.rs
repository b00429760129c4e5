//! Implementation of the `restpack plan` command.
//!
//! Validates the configuration and prints the ordered steps with the commands
//! they would run. Nothing is executed and no directory is created.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use restpack_lib::config::PipelineConfig;
use restpack_lib::pipeline::{PipelineOptions, plan};

use crate::output::{OutputFormat, print_json, print_stat, symbols};

pub fn cmd_plan(config_path: &Path, allow_unpinned: bool, output: OutputFormat) -> Result<ExitCode> {
  let config = PipelineConfig::load(config_path)
    .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
  let options = PipelineOptions {
    keep_work: false,
    allow_unpinned,
  };

  let steps = plan(&config, &options).context("Failed to plan pipeline")?;

  if output.is_json() {
    print_json(&serde_json::json!({
      "name": config.name,
      "images_dir": config.output.images_dir,
      "steps": steps,
    }))?;
    return Ok(ExitCode::SUCCESS);
  }

  println!("Plan: {}", config.name);
  print_stat("Images", &config.output.images_dir.display().to_string());
  print_stat("Steps", &steps.len().to_string());

  for (i, step) in steps.iter().enumerate() {
    println!();
    println!(
      "{:>2}. {} {}",
      i + 1,
      step.step.if_supports_color(Stream::Stdout, |s| s.bold()),
      format!("[{}]", step.stage).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
    println!("    {}", step.description);
    if !step.depends_on.is_empty() {
      let deps: Vec<&str> = step.depends_on.iter().map(|d| d.name()).collect();
      println!("    after: {}", deps.join(", "));
    }
    for command in &step.commands {
      println!(
        "    {} {}",
        symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.cyan()),
        command
      );
    }
  }

  Ok(ExitCode::SUCCESS)
}
