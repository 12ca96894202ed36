//! Shared test helpers for CLI integration tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Stand-in for cargo. Understands the invocations plugpack makes and
/// appends the scope of each build to a log next to the store.
///
/// `-vV` prints the contents of `cargo.version` when present. Third-party
/// outputs go to `<target>/<profile>/deps`. The package build finds the
/// manifest declaring the `-p` package and writes `lib<name>.<so|dylib>` when
/// it is a cdylib, `lib<name>.a` otherwise. Sources containing `FAIL` produce
/// a compile error.
const FAKE_CARGO: &str = r#"#!/bin/sh
set -e
if [ "$1" = "-vV" ]; then
  if [ -f "@VERSION@" ]; then cat "@VERSION@"; else echo "cargo 1.85.0 (d73d2caf9 2024-12-31)"; fi
  exit 0
fi

manifest=""
target=""
profile_dir="debug"
package=""
scope=""
while [ $# -gt 0 ]; do
  case "$1" in
    --manifest-path) manifest="$2"; shift ;;
    --target-dir) target="$2"; shift ;;
    --release) profile_dir="release" ;;
    --workspace) scope="workspace" ;;
    -p) package="$2"; scope="package"; shift ;;
  esac
  shift
done

if [ -n "${LEAKY_SECRET:-}" ]; then
  echo "host environment leaked into the build" >&2
  exit 1
fi

echo "$scope $package" >> "@LOG@"
out="$target/$profile_dir"
mkdir -p "$out/deps"

if [ "$scope" = "workspace" ]; then
  echo rlib > "$out/deps/libcfg_if-0123456789abcdef.rlib"
  exit 0
fi

root="$(dirname "$manifest")"
member=$(grep -rl --include=Cargo.toml "^name = \"$package\"" "$root" | grep -v '/target/' | head -n 1)
if [ -z "$member" ]; then
  echo "error: package ID specification \`$package\` did not match any packages" >&2
  exit 101
fi

src="$(dirname "$member")/src"
if grep -rq FAIL "$src"; then
  echo "error[E0425]: cannot find value \`gain\` in this scope" >&2
  exit 101
fi

lib=$(echo "$package" | tr - _)
if grep -q cdylib "$member"; then
  if [ "$(uname)" = "Darwin" ]; then ext=dylib; else ext=so; fi
  printf 'compiled %s\n' "$package" > "$out/lib$lib.$ext"
else
  echo archive > "$out/lib$lib.a"
fi
"#;

/// Native shared library extension on this host.
pub fn native_ext() -> &'static str {
  if cfg!(target_os = "macos") { "dylib" } else { "so" }
}

/// Isolated test environment: a workspace, a store, and a fake cargo.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// A single-crate workspace named `cave` with the given crate type.
  pub fn cave(crate_type: &str) -> Self {
    let env = Self::empty();
    env.write_file(
      "Cargo.toml",
      &format!(
        "[package]\nname = \"cave\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[lib]\ncrate-type = [\"{crate_type}\"]\n"
      ),
    );
    env.write_file("Cargo.lock", "version = 4\n\n[[package]]\nname = \"cave\"\nversion = \"0.1.0\"\n");
    env.write_file("src/lib.rs", "pub fn gain() -> f32 {\n  0.5\n}\n");
    env
  }

  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("ws")).unwrap();

    let bin = temp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let log = temp.path().join("cargo.log");
    let cargo = bin.join("cargo");
    let version = temp.path().join("cargo.version");
    let script = FAKE_CARGO
      .replace("@LOG@", &log.display().to_string())
      .replace("@VERSION@", &version.display().to_string());
    fs::write(&cargo, script).unwrap();
    fs::set_permissions(&cargo, fs::Permissions::from_mode(0o755)).unwrap();

    Self { temp }
  }

  /// Write a file relative to the workspace root.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.workspace().join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
  }

  /// Make the fake cargo report a different toolchain identity.
  pub fn set_cargo_version(&self, version: &str) {
    fs::write(self.temp.path().join("cargo.version"), format!("{version}\n")).unwrap();
  }

  pub fn workspace(&self) -> PathBuf {
    self.temp.path().join("ws")
  }

  pub fn store(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  /// Bundle location for the default output layout.
  pub fn bundle(&self, package: &str) -> PathBuf {
    self
      .workspace()
      .join("result/lib/clap")
      .join(format!("{package}.clap"))
  }

  /// Scopes of the fake cargo calls so far, e.g. `["workspace ", "package cave"]`.
  pub fn cargo_calls(&self) -> Vec<String> {
    match fs::read_to_string(self.temp.path().join("cargo.log")) {
      Ok(log) => log.lines().map(str::to_string).collect(),
      Err(_) => Vec::new(),
    }
  }

  pub fn workspace_builds(&self) -> usize {
    self.cargo_calls().iter().filter(|c| c.starts_with("workspace")).count()
  }

  /// A plugpack command with the isolated store and fake cargo.
  pub fn plugpack_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("plugpack");
    cmd.env("PLUGPACK_STORE", self.store());
    cmd.env("PLUGPACK_CARGO", self.temp.path().join("bin/cargo"));
    cmd.env_remove("LEAKY_SECRET");
    cmd
  }

  /// `plugpack build -w <ws> -p <package>`.
  pub fn build(&self, package: &str) -> Command {
    let mut cmd = self.plugpack_cmd();
    cmd.arg("build").arg("-w").arg(self.workspace()).args(["-p", package]);
    cmd
  }
}

/// Every regular file under `dir`, relative and sorted.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
  let mut files = Vec::new();
  let mut stack = vec![dir.to_path_buf()];
  while let Some(current) = stack.pop() {
    let Ok(entries) = fs::read_dir(&current) else {
      continue;
    };
    for entry in entries.flatten() {
      let path = entry.path();
      if path.is_dir() {
        stack.push(path);
      } else {
        files.push(path.strip_prefix(dir).unwrap().to_path_buf());
      }
    }
  }
  files.sort();
  files
}
