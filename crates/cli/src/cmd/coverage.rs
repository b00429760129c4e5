//! Implementation of the `restpack coverage` command.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use restpack_lib::coverage::generate;

use crate::output::{OutputFormat, print_json, print_stat, print_success};

pub fn cmd_coverage(spec: &Path, out: &Path, percentage: u8, output: OutputFormat) -> Result<ExitCode> {
  let (report, files) =
    generate(spec, out, percentage).with_context(|| format!("Failed to generate coverage for {}", spec.display()))?;

  if output.is_json() {
    print_json(&serde_json::json!({ "report": report, "files": files }))?;
  } else {
    print_success("Coverage reports generated");
    print_stat("Total endpoints", &report.total_endpoints.to_string());
    print_stat(
      "Covered",
      &format!("{} ({}%)", report.covered_endpoints.len(), report.coverage_percentage),
    );
    print_stat("Uncovered", &report.uncovered_endpoints.len().to_string());
    print_stat("JSON", &files.json.display().to_string());
    print_stat("HTML", &files.html.display().to_string());
  }

  Ok(ExitCode::SUCCESS)
}
