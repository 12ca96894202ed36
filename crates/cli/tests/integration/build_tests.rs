use std::fs;
use std::os::unix::fs::PermissionsExt;

use predicates::prelude::*;

use super::common::{TestEnv, files_under, native_ext};

#[test]
fn cdylib_is_packaged_as_clap_bundle() {
  let env = TestEnv::cave("cdylib");

  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Packaged cave (release)"))
    .stdout(predicate::str::contains("cave.clap"))
    .stdout(predicate::str::contains("Cache hit: no"));

  let bundle = env.bundle("cave");
  assert_eq!(fs::read_to_string(&bundle).unwrap(), "compiled cave\n");
  let mode = fs::metadata(&bundle).unwrap().permissions().mode();
  assert_ne!(mode & 0o111, 0, "bundle should be executable");
  assert_eq!(env.cargo_calls(), vec!["workspace ".to_string(), "package cave".to_string()]);
}

#[test]
fn second_build_reuses_dependencies_and_overwrites_bundle() {
  let env = TestEnv::cave("cdylib");

  env.build("cave").assert().success();
  let first = fs::read(env.bundle("cave")).unwrap();

  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache hit: yes"));

  assert_eq!(env.workspace_builds(), 1);
  assert_eq!(fs::read(env.bundle("cave")).unwrap(), first);
  assert_eq!(
    files_under(&env.workspace().join("result")),
    vec![std::path::PathBuf::from("lib/clap/cave.clap")]
  );
}

#[test]
fn source_edits_do_not_rebuild_dependencies() {
  let env = TestEnv::cave("cdylib");

  env.build("cave").assert().success();
  env.write_file("src/lib.rs", "pub fn gain() -> f32 {\n  0.25\n}\n");
  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache hit: yes"));

  assert_eq!(env.workspace_builds(), 1);
}

#[test]
fn lock_edits_rebuild_dependencies() {
  let env = TestEnv::cave("cdylib");

  env.build("cave").assert().success();
  env.write_file(
    "Cargo.lock",
    "# regenerated\nversion = 4\n\n[[package]]\nname = \"cave\"\nversion = \"0.1.0\"\n",
  );
  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache hit: no"));

  assert_eq!(env.workspace_builds(), 2);
}

#[test]
fn toolchain_upgrade_rebuilds_dependencies() {
  let env = TestEnv::cave("cdylib");

  env.build("cave").assert().success();
  env.set_cargo_version("cargo 1.86.0 (adf9b6ad1 2025-02-28)");
  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache hit: no"));
  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache hit: yes"));

  assert_eq!(env.workspace_builds(), 2);
}

#[test]
fn staticlib_fails_naming_the_expected_library() {
  let env = TestEnv::cave("staticlib");

  env
    .build("cave")
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("error in bundle stage"))
    .stderr(predicate::str::contains(format!("target/release/libcave.{}", native_ext())));

  assert!(!env.workspace().join("result").exists());
}

#[test]
fn compile_errors_are_reported_verbatim() {
  let env = TestEnv::cave("cdylib");
  env.write_file("src/lib.rs", "pub fn gain() -> f32 { FAIL }\n");

  env
    .build("cave")
    .assert()
    .failure()
    .stderr(predicate::str::contains("error in package stage"))
    .stderr(predicate::str::contains("error[E0425]: cannot find value `gain` in this scope"));

  assert!(!env.bundle("cave").exists());
}

#[test]
fn host_environment_does_not_reach_cargo() {
  let env = TestEnv::cave("cdylib");

  env.build("cave").env("LEAKY_SECRET", "hunter2").assert().success();

  assert!(env.bundle("cave").exists());
}

#[test]
fn passthrough_variables_reach_cargo() {
  let env = TestEnv::cave("cdylib");
  env.write_file("plugpack.toml", "[environment]\npassthrough = [\"LEAKY_SECRET\"]\n");

  env
    .build("cave")
    .env("LEAKY_SECRET", "hunter2")
    .assert()
    .failure()
    .stderr(predicate::str::contains("host environment leaked into the build"));
}

#[test]
fn custom_layout_and_dev_profile() {
  let env = TestEnv::cave("cdylib");

  env
    .build("cave")
    .args(["-o", "dist", "--kind", "vst3", "--extension", ".vst3", "--profile", "dev"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Packaged cave (dev)"));

  let bundle = env.workspace().join("dist/lib/vst3/cave.vst3");
  assert_eq!(fs::read_to_string(bundle).unwrap(), "compiled cave\n");
  assert!(!env.workspace().join("result").exists());
}

#[test]
fn config_file_names_the_package() {
  let env = TestEnv::cave("cdylib");
  env.write_file("plugpack.toml", "[package]\nname = \"cave\"\n\n[bundle]\noutput = \"out\"\n");

  env
    .plugpack_cmd()
    .arg("build")
    .arg("-w")
    .arg(env.workspace())
    .assert()
    .success();

  assert!(env.workspace().join("out/lib/clap/cave.clap").is_file());
}

#[test]
fn json_output_reports_the_bundle() {
  let env = TestEnv::cave("cdylib");

  let output = env.build("cave").args(["--output", "json"]).output().unwrap();

  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value["package"], "cave");
  assert_eq!(value["cache_hit"], false);
  assert!(value["bundle"]["path"].as_str().unwrap().ends_with("lib/clap/cave.clap"));
  assert_eq!(value["dependency_key"].as_str().unwrap().len(), 20);
}

#[test]
fn deps_command_warms_the_cache() {
  let env = TestEnv::cave("cdylib");

  env
    .plugpack_cmd()
    .arg("deps")
    .arg("-w")
    .arg(env.workspace())
    .assert()
    .success()
    .stdout(predicate::str::contains("Dependencies ready"));

  env
    .build("cave")
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache hit: yes"));

  assert_eq!(env.workspace_builds(), 1);
}

#[test]
fn virtual_workspace_member_is_packaged() {
  let env = TestEnv::empty();
  env.write_file("Cargo.toml", "[workspace]\nmembers = [\"plugins/*\"]\nresolver = \"2\"\n");
  env.write_file(
    "plugins/deep-cave/Cargo.toml",
    "[package]\nname = \"deep-cave\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[lib]\ncrate-type = [\"cdylib\"]\n",
  );
  env.write_file("plugins/deep-cave/src/lib.rs", "pub fn process() {}\n");
  env.write_file(
    "Cargo.lock",
    "version = 4\n\n[[package]]\nname = \"deep-cave\"\nversion = \"0.1.0\"\n",
  );

  env.build("deep-cave").assert().success();

  assert_eq!(
    fs::read_to_string(env.bundle("deep-cave")).unwrap(),
    "compiled deep-cave\n"
  );
}

/// A virtual root manifest with one cdylib plugin and one staticlib helper.
fn plugin_and_helper() -> TestEnv {
  let env = TestEnv::empty();
  env.write_file("Cargo.toml", "[workspace]\nmembers = [\"plugins/*\"]\nresolver = \"2\"\n");
  env.write_file(
    "plugins/deep-cave/Cargo.toml",
    "[package]\nname = \"deep-cave\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[lib]\ncrate-type = [\"cdylib\"]\n",
  );
  env.write_file("plugins/deep-cave/src/lib.rs", "pub fn process() {}\n");
  env.write_file(
    "plugins/cave-core/Cargo.toml",
    "[package]\nname = \"cave-core\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[lib]\ncrate-type = [\"staticlib\"]\n",
  );
  env.write_file("plugins/cave-core/src/lib.rs", "pub fn mix() {}\n");
  env.write_file(
    "Cargo.lock",
    "version = 4\n\n[[package]]\nname = \"cave-core\"\nversion = \"0.1.0\"\n\n[[package]]\nname = \"deep-cave\"\nversion = \"0.1.0\"\n",
  );
  env
}

#[test]
fn virtual_workspace_builds_only_the_selected_member() {
  let env = plugin_and_helper();

  env
    .build("cave-core")
    .assert()
    .failure()
    .stderr(predicate::str::contains("error in bundle stage"))
    .stderr(predicate::str::contains(format!("libcave_core.{}", native_ext())));
  env.build("deep-cave").assert().success();

  assert!(!env.bundle("cave-core").exists());
  assert_eq!(
    fs::read_to_string(env.bundle("deep-cave")).unwrap(),
    "compiled deep-cave\n"
  );
}

#[test]
fn virtual_workspace_member_compile_error_is_reported() {
  let env = plugin_and_helper();
  env.write_file("plugins/deep-cave/src/lib.rs", "pub fn process() { FAIL }\n");

  env
    .build("deep-cave")
    .assert()
    .failure()
    .stderr(predicate::str::contains("error in package stage"))
    .stderr(predicate::str::contains("error[E0425]"));
  env.build("cave-core").assert().failure().stderr(predicate::str::contains("error in bundle stage"));
}
