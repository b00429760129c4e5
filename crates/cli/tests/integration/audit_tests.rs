//! Audit command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn freshly_built_image_is_clean() {
  let env = TestEnv::project();
  env.build();

  env
    .restpack_cmd()
    .arg("audit")
    .arg(env.image_dir())
    .assert()
    .success()
    .stdout(predicate::str::contains("passed audit"));
}

#[test]
fn forbidden_package_is_reported() {
  let env = TestEnv::project();
  env.build();

  env
    .restpack_cmd()
    .arg("audit")
    .arg(env.image_dir())
    .args(["--forbid", "requests"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("must not be installed"));
}

#[test]
fn leaked_entry_is_reported_as_json() {
  let env = TestEnv::project();
  env.build();
  std::fs::create_dir_all(env.image_dir().join("rootfs/src")).unwrap();

  let output = env
    .restpack_cmd()
    .args(["audit", "-o", "json"])
    .arg(env.image_dir())
    .output()
    .unwrap();
  assert!(!output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["clean"], false);
  assert_eq!(json["findings"][0]["kind"], "unexpected_entry");
  assert_eq!(json["findings"][0]["name"], "src");

  env
    .restpack_cmd()
    .arg("audit")
    .arg(env.image_dir())
    .args(["--allow", "src"])
    .assert()
    .success();
}
