//! CLI smoke tests for restpack.
//!
//! These tests verify that every command parses its arguments, runs without
//! panicking and returns appropriate exit codes on bad input.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the restpack binary.
fn restpack_cmd() -> Command {
  let mut cmd: Command = cargo_bin_cmd!("restpack");
  cmd.env_remove("RESTPACK_IMAGES_DIR");
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  restpack_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  restpack_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("restpack"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "plan", "run", "audit", "coverage"] {
    restpack_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn unknown_subcommand_fails() {
  restpack_cmd().arg("frobnicate").assert().failure();
}

// =============================================================================
// Bad input
// =============================================================================

#[test]
fn build_without_config_fails() {
  let temp = TempDir::new().unwrap();

  restpack_cmd()
    .current_dir(temp.path())
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("restpack.toml"));
}

#[test]
fn plan_with_invalid_config_fails() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("restpack.toml"), "[sources\n").unwrap();

  restpack_cmd()
    .current_dir(temp.path())
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to parse config"));
}

#[test]
fn plan_with_unknown_field_fails() {
  let temp = TempDir::new().unwrap();
  std::fs::write(
    temp.path().join("restpack.toml"),
    "[sources]\nengine = \"e\"\ntools = \"t\"\ndriver = \"d.py\"\n\n[target]\nunknown = 1\n",
  )
  .unwrap();

  restpack_cmd().current_dir(temp.path()).arg("plan").assert().failure();
}

#[test]
fn plan_with_defaults_succeeds() {
  let temp = TempDir::new().unwrap();
  std::fs::write(
    temp.path().join("restpack.toml"),
    "[sources]\nengine = \"src/compiler\"\ntools = \"restler\"\ndriver = \"build-restler.py\"\n",
  )
  .unwrap();

  restpack_cmd()
    .current_dir(temp.path())
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("dotnet"))
    .stdout(predicate::str::contains("requests==2.31.0"));
}

#[test]
fn run_not_an_image_fails() {
  let temp = TempDir::new().unwrap();

  restpack_cmd().arg("run").arg(temp.path()).assert().failure();
}

#[test]
fn audit_not_an_image_fails() {
  let temp = TempDir::new().unwrap();

  restpack_cmd().arg("audit").arg(temp.path()).assert().failure();
}

#[test]
fn json_log_format_is_accepted() {
  let temp = TempDir::new().unwrap();

  restpack_cmd()
    .current_dir(temp.path())
    .args(["-vv", "--log-format", "json", "coverage"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}
