//! Build command integration tests.

use predicates::prelude::*;

use super::common::{FAILING_BUILD_SCRIPT, TestEnv};

#[test]
fn build_publishes_image() {
  let env = TestEnv::project();

  env
    .restpack_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built image restler"))
    .stdout(predicate::str::contains("target.publish"));

  let image = env.image_dir();
  assert!(image.join("image.json").is_file());
  assert!(image.join("rootfs/app/App.dll").is_file());
  assert!(!image.join("rootfs/app/.restpack-output").exists());
}

#[test]
fn build_json_output_reports_steps() {
  let env = TestEnv::project();

  let output = env.restpack_cmd().args(["build", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["success"], true);
  assert_eq!(json["failure"], serde_json::Value::Null);
  assert!(json["report"]["build_output_hash"].is_string());
  let steps = json["report"]["steps"].as_array().unwrap();
  assert!(steps.iter().all(|s| s["status"] == "succeeded"));
}

#[test]
fn failing_driver_reports_step_and_publishes_nothing() {
  let env = TestEnv::project();
  env.write_file("build.sh", FAILING_BUILD_SCRIPT);

  env
    .restpack_cmd()
    .arg("build")
    .assert()
    .failure()
    .stdout(predicate::str::contains("builder.driver"))
    .stderr(predicate::str::contains("BuildFailure"))
    .stderr(predicate::str::contains("compiler exploded"));

  assert!(!env.image_dir().exists());
}

#[test]
fn unpinned_dependency_is_rejected() {
  let env = TestEnv::unpinned();

  env
    .restpack_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("no pinned version"));

  assert!(!env.images_dir().exists());
}

#[test]
fn allow_unpinned_flag_builds() {
  let env = TestEnv::unpinned();

  env.restpack_cmd().args(["build", "--allow-unpinned"]).assert().success();
  assert!(env.image_dir().join("image.json").is_file());
}

#[test]
fn keep_work_retains_work_directory() {
  let env = TestEnv::project();

  env
    .restpack_cmd()
    .args(["build", "--keep-work"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Work directory kept at"));

  let kept: Vec<_> = std::fs::read_dir(env.path().join("work")).unwrap().collect();
  assert_eq!(kept.len(), 1);
}

#[test]
fn missing_config_fails() {
  let env = TestEnv::project();

  env
    .restpack_cmd()
    .args(["build", "-c", "missing.toml"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load config"));
}
