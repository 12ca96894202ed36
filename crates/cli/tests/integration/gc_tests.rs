use std::fs;

use predicates::prelude::*;

use super::common::TestEnv;

fn dependency_sets(env: &TestEnv) -> usize {
  fs::read_dir(env.store().join("deps")).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn gc_keeps_complete_sets() {
  let env = TestEnv::cave("cdylib");
  env.build("cave").assert().success();

  env
    .plugpack_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));

  assert_eq!(dependency_sets(&env), 1);
}

#[test]
fn gc_all_forces_a_rebuild() {
  let env = TestEnv::cave("cdylib");
  env.build("cave").assert().success();

  env.plugpack_cmd().args(["gc", "--all"]).assert().success();
  assert_eq!(dependency_sets(&env), 0);

  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache hit: no"));
  assert_eq!(env.workspace_builds(), 2);
}

#[test]
fn gc_removes_incomplete_sets() {
  let env = TestEnv::empty();
  fs::create_dir_all(env.store().join("deps/aaaaaaaaaaaaaaaaaaaa/target")).unwrap();

  env.plugpack_cmd().arg("gc").assert().success();

  assert_eq!(dependency_sets(&env), 0);
}

#[test]
fn gc_dry_run_json() {
  let env = TestEnv::cave("cdylib");
  env.build("cave").assert().success();

  let output = env
    .plugpack_cmd()
    .args(["--output", "json", "gc", "--all", "--dry-run"])
    .output()
    .unwrap();

  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value["dry_run"], true);
  assert_eq!(value["stats"]["sets_deleted"], 1);
  assert_eq!(value["deleted_paths"].as_array().unwrap().len(), 1);
  assert_eq!(dependency_sets(&env), 1);
}
