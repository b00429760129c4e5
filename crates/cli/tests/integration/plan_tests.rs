//! Plan command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_lists_steps_in_order() {
  let env = TestEnv::project();

  let output = env.restpack_cmd().arg("plan").output().unwrap();
  assert!(output.status.success());

  let stdout = String::from_utf8(output.stdout).unwrap();
  let driver = stdout.find("builder.driver").unwrap();
  let seal = stdout.find("builder.seal").unwrap();
  let publish = stdout.find("target.publish").unwrap();
  assert!(driver < seal && seal < publish);
  assert!(stdout.contains("--dest_dir <work>/build"));
}

#[test]
fn plan_creates_nothing() {
  let env = TestEnv::project();

  env.restpack_cmd().arg("plan").assert().success();

  assert!(!env.images_dir().exists());
  assert!(!env.path().join("work").exists());
}

#[test]
fn plan_json_output() {
  let env = TestEnv::project();

  let output = env.restpack_cmd().args(["plan", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["name"], "restler");
  assert_eq!(json["steps"][0]["step"], "builder.toolchain");
}

#[test]
fn plan_rejects_unpinned_dependency() {
  let env = TestEnv::unpinned();

  env
    .restpack_cmd()
    .arg("plan")
    .assert()
    .failure()
    .stderr(predicate::str::contains("requests"));

  env.restpack_cmd().args(["plan", "--allow-unpinned"]).assert().success();
}
