//! Coverage command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

const SPEC: &str = r#"
openapi: 3.0.0
paths:
  /pets:
    get: {}
  /pets/{id}:
    get: {}
  /owners:
    get: {}
  /health:
    get: {}
"#;

#[test]
fn coverage_writes_reports_with_defaults() {
  let env = TestEnv::project();
  env.write_file("api_spec.yaml", SPEC);

  env
    .restpack_cmd()
    .arg("coverage")
    .assert()
    .success()
    .stdout(predicate::str::contains("Coverage reports generated"))
    .stdout(predicate::str::contains("2 (71%)"));

  let reports = env.path().join("coverage_reports");
  let json: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(reports.join("restler_coverage.json")).unwrap()).unwrap();
  assert_eq!(json["total_endpoints"], 4);
  assert_eq!(json["coverage_percentage"], 71);
  assert!(reports.join("restler_coverage.html").is_file());
}

#[test]
fn coverage_custom_percentage_and_paths() {
  let env = TestEnv::project();
  env.write_file("specs/pets.yaml", SPEC);

  let output = env
    .restpack_cmd()
    .args(["coverage", "--spec", "specs/pets.yaml", "--out", "out", "--percentage", "100", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["report"]["covered_endpoints"].as_array().unwrap().len(), 4);
  assert!(env.path().join("out/restler_coverage.html").is_file());
}

#[test]
fn coverage_rejects_out_of_range_percentage() {
  let env = TestEnv::project();
  env.write_file("api_spec.yaml", SPEC);

  env
    .restpack_cmd()
    .args(["coverage", "--percentage", "150"])
    .assert()
    .failure();
}

#[test]
fn coverage_missing_spec_fails() {
  let env = TestEnv::project();

  env
    .restpack_cmd()
    .arg("coverage")
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}
