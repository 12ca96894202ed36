//! Fixtures for library tests: throwaway workspaces and a fake cargo.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use walkdir::WalkDir;

use crate::bundle::artifact_file_name;
use crate::env::Environment;
use crate::platform::os::Os;
use crate::toolchain::{BuildScope, CargoInvocation, Toolchain, ToolchainError};

pub const REGISTRY: &str = "registry+https://github.com/rust-lang/crates.io-index";

/// Hash suffix the fake gives third-party outputs.
pub const DEP_SUFFIX: &str = "0123456789abcdef";
/// Hash suffix the fake gives workspace member outputs.
pub const MEMBER_SUFFIX: &str = "fedcba9876543210";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibKind {
  Cdylib,
  Staticlib,
}

impl LibKind {
  fn crate_type(self) -> &'static str {
    match self {
      Self::Cdylib => "cdylib",
      Self::Staticlib => "staticlib",
    }
  }
}

fn write(path: &Path, content: &str) {
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, content).unwrap();
}

fn package_manifest(name: &str, kind: LibKind) -> String {
  format!(
    "[package]\nname = \"{name}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[lib]\ncrate-type = [\"{}\"]\n",
    kind.crate_type()
  )
}

fn lock_entry(name: &str) -> String {
  format!("\n[[package]]\nname = \"{name}\"\nversion = \"0.1.0\"\n")
}

/// A single-package workspace with a lock listing only the package itself.
pub fn write_single_crate(root: &Path, name: &str, kind: LibKind) {
  write(&root.join("Cargo.toml"), &package_manifest(name, kind));
  write(&root.join("src/lib.rs"), "pub fn gain() -> f32 {\n  0.5\n}\n");
  write(&root.join("Cargo.lock"), &format!("version = 4\n{}", lock_entry(name)));
}

/// A virtual workspace with members under `plugins/<name>`.
pub fn write_workspace(root: &Path, members: &[(&str, LibKind)]) {
  write(
    &root.join("Cargo.toml"),
    "[workspace]\nmembers = [\"plugins/*\"]\nresolver = \"2\"\n",
  );

  let mut lock = "version = 4\n".to_string();
  for (name, kind) in members {
    let dir = root.join("plugins").join(name);
    write(&dir.join("Cargo.toml"), &package_manifest(name, *kind));
    write(&dir.join("src/lib.rs"), "pub fn process() {}\n");
    lock.push_str(&lock_entry(name));
  }
  write(&root.join("Cargo.lock"), &lock);
}

#[derive(Debug, Clone)]
pub struct FakeCall {
  pub invocation: CargoInvocation,
  /// Whether third-party outputs were already in the target dir.
  pub saw_dependencies: bool,
}

/// Stands in for cargo: records calls and writes plausible outputs.
///
/// A workspace build leaves one third-party rlib plus hashed and plain outputs
/// for every member. A package build reads the member's manifest and emits a
/// shared library for `cdylib`, an archive for `staticlib`.
#[derive(Debug, Default)]
pub struct FakeToolchain {
  calls: Mutex<Vec<FakeCall>>,
  fail_workspace: bool,
  fail_package: bool,
  missing: bool,
  version: Option<String>,
}

/// Identity the fake reports unless built with [`FakeToolchain::with_version`].
pub const FAKE_VERSION: &str = "cargo 1.85.0 (d73d2caf9 2024-12-31)";

impl FakeToolchain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing_workspace() -> Self {
    Self {
      fail_workspace: true,
      ..Default::default()
    }
  }

  pub fn failing_package() -> Self {
    Self {
      fail_package: true,
      ..Default::default()
    }
  }

  pub fn missing() -> Self {
    Self {
      missing: true,
      ..Default::default()
    }
  }

  pub fn with_version(version: &str) -> Self {
    Self {
      version: Some(version.to_string()),
      ..Default::default()
    }
  }

  pub fn calls(&self) -> Vec<FakeCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn workspace_builds(&self) -> usize {
    self
      .calls()
      .iter()
      .filter(|c| c.invocation.scope == BuildScope::Workspace)
      .count()
  }

  fn dependency_rlib(invocation: &CargoInvocation) -> std::path::PathBuf {
    invocation
      .target_dir
      .join(invocation.profile.dir_name())
      .join("deps")
      .join(format!("libcfg_if-{DEP_SUFFIX}.rlib"))
  }
}

/// `(package name, crate types)` for every manifest under `dir`.
fn packages_under(dir: &Path) -> Vec<(String, Vec<String>)> {
  WalkDir::new(dir)
    .into_iter()
    .filter_entry(|e| e.file_name() != "target")
    .filter_map(|e| e.ok())
    .filter(|e| e.file_name() == "Cargo.toml")
    .filter_map(|e| {
      let table: toml::Table = toml::from_str(&fs::read_to_string(e.path()).ok()?).ok()?;
      let name = table.get("package")?.get("name")?.as_str()?.to_string();
      let types = table
        .get("lib")
        .and_then(|lib| lib.get("crate-type"))
        .and_then(|t| t.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
      Some((name, types))
    })
    .collect()
}

impl Toolchain for FakeToolchain {
  fn version(&self, _env: &Environment) -> Result<String, ToolchainError> {
    if self.missing {
      return Err(ToolchainError::NotFound {
        program: "cargo".into(),
      });
    }
    Ok(self.version.clone().unwrap_or_else(|| FAKE_VERSION.to_string()))
  }

  fn build(&self, invocation: &CargoInvocation, _env: &Environment) -> Result<(), ToolchainError> {
    let saw_dependencies = Self::dependency_rlib(invocation).exists();
    self.calls.lock().unwrap().push(FakeCall {
      invocation: invocation.clone(),
      saw_dependencies,
    });

    if self.missing {
      return Err(ToolchainError::NotFound {
        program: "cargo".into(),
      });
    }

    let profile_dir = invocation.target_dir.join(invocation.profile.dir_name());
    let packages = packages_under(invocation.working_dir());

    match &invocation.scope {
      BuildScope::Workspace => {
        if self.fail_workspace {
          return Err(ToolchainError::Failed {
            program: "cargo".to_string(),
            code: Some(101),
            stderr: "error: failed to compile `cfg-if v1.0.0`".to_string(),
          });
        }
        write(&Self::dependency_rlib(invocation), "cfg-if rlib");
        write(
          &profile_dir.join(format!(".fingerprint/cfg-if-{DEP_SUFFIX}/lib-cfg_if")),
          "fingerprint",
        );
        for (name, _) in &packages {
          let crate_name = name.replace('-', "_");
          write(
            &profile_dir.join(format!("deps/lib{crate_name}-{MEMBER_SUFFIX}.rlib")),
            "stub",
          );
          write(
            &profile_dir.join(format!(".fingerprint/{name}-{MEMBER_SUFFIX}/lib-{crate_name}")),
            "stub",
          );
          write(&profile_dir.join(format!("lib{crate_name}.rlib")), "stub");
          write(&profile_dir.join(format!("lib{crate_name}.d")), "stub");
        }
      }
      BuildScope::Package(name) => {
        if self.fail_package {
          return Err(ToolchainError::Failed {
            program: "cargo".to_string(),
            code: Some(101),
            stderr: format!("error[E0425]: cannot find value `gain` in crate `{name}`"),
          });
        }
        let Some((_, types)) = packages.iter().find(|(n, _)| n == name) else {
          return Err(ToolchainError::Failed {
            program: "cargo".to_string(),
            code: Some(101),
            stderr: format!("error: package ID specification `{name}` did not match any packages"),
          });
        };
        let crate_name = name.replace('-', "_");
        let os = Os::current().unwrap_or(Os::Linux);
        if types.iter().any(|t| t == "cdylib") {
          write(
            &profile_dir.join(artifact_file_name(name, os)),
            &format!("compiled {name}"),
          );
        }
        if types.iter().any(|t| t == "staticlib") {
          write(&profile_dir.join(format!("lib{crate_name}.a")), "archive");
        }
      }
    }
    Ok(())
  }
}
