//! Run command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn run_forwards_arguments() {
  let env = TestEnv::project();
  env.build();

  env
    .restpack_cmd()
    .arg("run")
    .arg(env.image_dir())
    .args(["--", "compile", "--api_spec", "spec.yaml"])
    .assert()
    .success()
    .stdout(predicate::str::contains("restler:compile --api_spec spec.yaml"));
}

#[test]
fn run_exits_with_entry_point_code() {
  let env = TestEnv::exiting(3);
  env.build();

  env.restpack_cmd().arg("run").arg(env.image_dir()).assert().code(3);
}

#[test]
fn run_missing_image_fails() {
  let env = TestEnv::project();

  env
    .restpack_cmd()
    .arg("run")
    .arg(env.image_dir())
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to run image"));
}
