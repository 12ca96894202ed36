//! Workspace model read from the Cargo manifests of a source closure.
//!
//! Only the parts of a manifest the pipeline needs are modelled: package names,
//! where their targets live (to stub them when building dependencies), their
//! declared library crate types, and the real package names of their declared
//! dependencies (to check the lock file against).

use std::collections::{BTreeMap, BTreeSet};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::closure::{ClosureError, SourceClosure};
use crate::consts::CARGO_TOML;

#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("no {CARGO_TOML} at the workspace root")]
  MissingRootManifest,

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: toml::de::Error,
  },

  #[error(transparent)]
  Closure(#[from] ClosureError),

  #[error("invalid workspace member pattern `{pattern}`: {source}")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: globset::Error,
  },

  #[error("workspace member {path} has no [package] table")]
  NotAPackage { path: String },

  #[error("package `{name}` is declared by both {first} and {second}")]
  DuplicatePackage { name: String, first: String, second: String },

  #[error("workspace declares no packages")]
  Empty,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
  package: Option<RawPackage>,
  workspace: Option<RawWorkspace>,
  lib: Option<RawLib>,
  #[serde(default)]
  bin: Vec<RawTarget>,
  #[serde(default)]
  bench: Vec<RawTarget>,
  #[serde(default)]
  test: Vec<RawTarget>,
  #[serde(default)]
  example: Vec<RawTarget>,
  #[serde(flatten)]
  deps: RawDependencies,
  #[serde(default)]
  target: BTreeMap<String, RawDependencies>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
  name: String,
  build: Option<toml::Value>,
  #[serde(default = "default_true")]
  autobins: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawWorkspace {
  #[serde(default)]
  members: Vec<String>,
  #[serde(default)]
  exclude: Vec<String>,
  #[serde(default)]
  dependencies: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLib {
  path: Option<String>,
  #[serde(rename = "crate-type", alias = "crate_type")]
  crate_type: Option<Vec<String>>,
}

/// A `[[bin]]`, `[[bench]]`, `[[test]]` or `[[example]]` entry.
#[derive(Debug, Deserialize)]
struct RawTarget {
  name: Option<String>,
  path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDependencies {
  #[serde(default)]
  dependencies: BTreeMap<String, toml::Value>,
  #[serde(default, rename = "dev-dependencies", alias = "dev_dependencies")]
  dev_dependencies: BTreeMap<String, toml::Value>,
  #[serde(default, rename = "build-dependencies", alias = "build_dependencies")]
  build_dependencies: BTreeMap<String, toml::Value>,
}

impl RawDependencies {
  fn all(&self) -> impl Iterator<Item = (&String, &toml::Value)> {
    self
      .dependencies
      .iter()
      .chain(self.dev_dependencies.iter())
      .chain(self.build_dependencies.iter())
  }
}

fn default_true() -> bool {
  true
}

/// Source files of a member's targets, relative to the workspace root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Targets {
  pub lib: Option<String>,
  pub bins: Vec<String>,
  pub build_script: Option<String>,
  /// Explicitly declared benches, tests and examples. Cargo refuses a manifest
  /// whose declared targets have no source file, even for a plain build.
  pub auxiliary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
  pub name: String,
  /// Member directory relative to the workspace root (`""` for the root package).
  pub dir: String,
  /// `[lib] crate-type`, empty when the manifest does not set it.
  pub crate_types: Vec<String>,
  pub targets: Targets,
  /// Real package names of every declared dependency.
  pub dependencies: BTreeSet<String>,
}

impl Member {
  pub fn manifest_path(&self) -> String {
    join_rel(&self.dir, CARGO_TOML)
  }

  /// Whether the manifest asks for a dynamically loadable library.
  pub fn declares_cdylib(&self) -> bool {
    self.crate_types.iter().any(|t| t == "cdylib")
  }
}

#[derive(Debug, Clone)]
pub struct Workspace {
  members: BTreeMap<String, Member>,
}

impl Workspace {
  /// Read the root manifest and every member manifest from the closure.
  pub fn load(closure: &SourceClosure) -> Result<Self, WorkspaceError> {
    let root = parse_manifest(closure, CARGO_TOML)?.ok_or(WorkspaceError::MissingRootManifest)?;
    let workspace_deps = root
      .workspace
      .as_ref()
      .map(|w| w.dependencies.clone())
      .unwrap_or_default();

    let mut dirs = Vec::new();
    if root.package.is_some() {
      dirs.push(String::new());
    }
    if let Some(ws) = &root.workspace {
      dirs.extend(expand_members(closure, ws)?);
    }

    let mut members: BTreeMap<String, Member> = BTreeMap::new();
    for dir in dirs {
      let member = if dir.is_empty() {
        build_member(closure, &dir, &root, &workspace_deps)?
      } else {
        let path = join_rel(&dir, CARGO_TOML);
        let raw = parse_manifest(closure, &path)?.ok_or_else(|| WorkspaceError::NotAPackage { path: path.clone() })?;
        build_member(closure, &dir, &raw, &workspace_deps)?
      };

      if let Some(existing) = members.get(&member.name) {
        return Err(WorkspaceError::DuplicatePackage {
          name: member.name.clone(),
          first: existing.manifest_path(),
          second: member.manifest_path(),
        });
      }
      members.insert(member.name.clone(), member);
    }

    if members.is_empty() {
      return Err(WorkspaceError::Empty);
    }

    debug!(members = ?members.keys().collect::<Vec<_>>(), "loaded workspace");
    Ok(Self { members })
  }

  pub fn members(&self) -> impl Iterator<Item = &Member> {
    self.members.values()
  }

  pub fn member(&self, name: &str) -> Option<&Member> {
    self.members.get(name)
  }

  pub fn member_names(&self) -> Vec<&str> {
    self.members.keys().map(String::as_str).collect()
  }

  pub fn is_member(&self, name: &str) -> bool {
    self.members.contains_key(name)
  }
}

fn parse_manifest(closure: &SourceClosure, rel: &str) -> Result<Option<RawManifest>, WorkspaceError> {
  let Some(text) = closure.read_to_string(rel)? else {
    return Ok(None);
  };
  toml::from_str(&text)
    .map(Some)
    .map_err(|source| WorkspaceError::Parse {
      path: rel.to_string(),
      source,
    })
}

/// Member directories matched by `[workspace] members`, minus `exclude`.
///
/// Patterns are matched against directories in the closure that hold a manifest,
/// so members outside the closure are never picked up.
fn expand_members(closure: &SourceClosure, ws: &RawWorkspace) -> Result<Vec<String>, WorkspaceError> {
  let include = compile_patterns(&ws.members)?;
  let exclude = compile_patterns(&ws.exclude)?;

  let dirs = closure
    .manifests()
    .filter_map(|f| f.path.strip_suffix(&format!("/{}", CARGO_TOML)))
    .filter(|dir| include.is_match(dir) && !exclude.is_match(dir))
    .map(str::to_string)
    .collect();

  Ok(dirs)
}

fn compile_patterns(patterns: &[String]) -> Result<GlobSet, WorkspaceError> {
  let mut set = GlobSetBuilder::new();
  for pattern in patterns {
    let glob = GlobBuilder::new(pattern.trim_end_matches('/'))
      .literal_separator(true)
      .build()
      .map_err(|source| WorkspaceError::InvalidPattern {
        pattern: pattern.clone(),
        source,
      })?;
    set.add(glob);
  }
  set.build().map_err(|source| WorkspaceError::InvalidPattern {
    pattern: patterns.join(", "),
    source,
  })
}

fn build_member(
  closure: &SourceClosure,
  dir: &str,
  raw: &RawManifest,
  workspace_deps: &BTreeMap<String, toml::Value>,
) -> Result<Member, WorkspaceError> {
  let package = raw.package.as_ref().ok_or_else(|| WorkspaceError::NotAPackage {
    path: join_rel(dir, CARGO_TOML),
  })?;

  let mut dependencies = BTreeSet::new();
  let tables = std::iter::once(&raw.deps).chain(raw.target.values());
  for table in tables {
    for (key, value) in table.all() {
      dependencies.insert(real_package_name(key, value, workspace_deps));
    }
  }

  Ok(Member {
    name: package.name.clone(),
    dir: dir.to_string(),
    crate_types: raw.lib.as_ref().and_then(|l| l.crate_type.clone()).unwrap_or_default(),
    targets: discover_targets(closure, dir, raw, package),
    dependencies,
  })
}

/// Resolve `package = "..."` renames, including renames inherited through
/// `workspace = true`.
fn real_package_name(key: &str, value: &toml::Value, workspace_deps: &BTreeMap<String, toml::Value>) -> String {
  let renamed = |v: &toml::Value| v.get("package").and_then(|p| p.as_str()).map(str::to_string);

  if let Some(name) = renamed(value) {
    return name;
  }

  let inherits = value.get("workspace").and_then(|w| w.as_bool()).unwrap_or(false);
  if inherits && let Some(name) = workspace_deps.get(key).and_then(renamed) {
    return name;
  }

  key.to_string()
}

fn discover_targets(closure: &SourceClosure, dir: &str, raw: &RawManifest, package: &RawPackage) -> Targets {
  let lib = match raw.lib.as_ref().and_then(|l| l.path.as_deref()) {
    Some(path) => Some(join_rel(dir, path)),
    None => Some(join_rel(dir, "src/lib.rs")).filter(|p| closure.contains(p)),
  };

  let mut bins: BTreeSet<String> = raw
    .bin
    .iter()
    .filter_map(|bin| declared_target_path(closure, dir, "src/bin", bin))
    .collect();

  if package.autobins {
    let main = join_rel(dir, "src/main.rs");
    if closure.contains(&main) {
      bins.insert(main);
    }
    let bin_dir = join_rel(dir, "src/bin/");
    for file in closure.files() {
      if let Some(rest) = file.path.strip_prefix(&bin_dir) {
        let direct = !rest.contains('/') && rest.ends_with(".rs");
        let nested = rest.ends_with("/main.rs") && rest.matches('/').count() == 1;
        if direct || nested {
          bins.insert(file.path.clone());
        }
      }
    }
  }

  let build_script = match &package.build {
    Some(toml::Value::String(path)) => Some(join_rel(dir, path)),
    Some(toml::Value::Boolean(false)) => None,
    _ => Some(join_rel(dir, "build.rs")).filter(|p| closure.contains(p)),
  };

  let auxiliary: BTreeSet<String> = [("benches", &raw.bench), ("tests", &raw.test), ("examples", &raw.example)]
    .into_iter()
    .flat_map(|(default_dir, declared)| {
      declared
        .iter()
        .filter_map(move |target| declared_target_path(closure, dir, default_dir, target))
    })
    .collect();

  Targets {
    lib,
    bins: bins.into_iter().collect(),
    build_script,
    auxiliary: auxiliary.into_iter().collect(),
  }
}

/// Source file of an explicitly declared target: its `path`, or
/// `<default_dir>/<name>.rs` with `<default_dir>/<name>/main.rs` as fallback.
fn declared_target_path(closure: &SourceClosure, dir: &str, default_dir: &str, target: &RawTarget) -> Option<String> {
  if let Some(path) = &target.path {
    return Some(join_rel(dir, path));
  }
  let name = target.name.as_ref()?;
  let candidate = join_rel(dir, &format!("{}/{}.rs", default_dir, name));
  let fallback = join_rel(dir, &format!("{}/{}/main.rs", default_dir, name));
  if closure.contains(&fallback) && !closure.contains(&candidate) {
    Some(fallback)
  } else {
    Some(candidate)
  }
}

fn join_rel(dir: &str, path: &str) -> String {
  let path = path.trim_start_matches("./");
  if dir.is_empty() {
    path.to_string()
  } else {
    format!("{}/{}", dir, path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{LibKind, write_single_crate};
  use std::fs;
  use std::path::Path;
  use tempfile::TempDir;

  fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  fn load(root: &Path) -> Result<Workspace, WorkspaceError> {
    let closure = SourceClosure::resolve(root, &[]).unwrap();
    Workspace::load(&closure)
  }

  #[test]
  fn single_package_is_its_own_workspace() {
    let temp = TempDir::new().unwrap();
    write_single_crate(temp.path(), "cave", LibKind::Cdylib);

    let ws = load(temp.path()).unwrap();

    assert_eq!(ws.member_names(), vec!["cave"]);
    let cave = ws.member("cave").unwrap();
    assert_eq!(cave.dir, "");
    assert!(cave.declares_cdylib());
    assert_eq!(cave.targets.lib.as_deref(), Some("src/lib.rs"));
  }

  #[test]
  fn glob_members_and_excludes() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
      root,
      "Cargo.toml",
      "[workspace]\nmembers = [\"crates/*\", \"tools/xtask\"]\nexclude = [\"crates/scratch\"]\n",
    );
    write(root, "crates/cave/Cargo.toml", "[package]\nname = \"cave\"\n");
    write(root, "crates/cave/src/lib.rs", "");
    write(root, "crates/dsp/Cargo.toml", "[package]\nname = \"cave-dsp\"\n");
    write(root, "crates/dsp/src/lib.rs", "");
    write(root, "crates/scratch/Cargo.toml", "[package]\nname = \"scratch\"\n");
    write(root, "crates/dsp/benches/nested/Cargo.toml", "[package]\nname = \"nested\"\n");
    write(root, "tools/xtask/Cargo.toml", "[package]\nname = \"xtask\"\n");
    write(root, "tools/xtask/src/main.rs", "fn main() {}");

    let ws = load(root).unwrap();

    assert_eq!(ws.member_names(), vec!["cave", "cave-dsp", "xtask"]);
    assert_eq!(ws.member("cave-dsp").unwrap().dir, "crates/dsp");
    assert_eq!(ws.member("xtask").unwrap().targets.bins, vec!["tools/xtask/src/main.rs"]);
  }

  #[test]
  fn dependencies_resolve_renames_and_inheritance() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
      root,
      "Cargo.toml",
      r#"
[workspace]
members = ["cave"]

[workspace.dependencies]
clack = { package = "clack-plugin", git = "https://example.com/clack.git" }
serde = "1"
"#,
    );
    write(
      root,
      "cave/Cargo.toml",
      r#"
[package]
name = "cave"

[lib]
crate-type = ["cdylib"]

[dependencies]
clack = { workspace = true }
serde = { workspace = true }
rwh = { package = "raw-window-handle", version = "0.5" }

[dev-dependencies]
approx = "0.5"

[build-dependencies]
cc = "1"

[target.'cfg(windows)'.dependencies]
winapi = "0.3"
"#,
    );
    write(root, "cave/src/lib.rs", "");

    let ws = load(root).unwrap();
    let deps: Vec<_> = ws.member("cave").unwrap().dependencies.iter().cloned().collect();

    assert_eq!(
      deps,
      vec!["approx", "cc", "clack-plugin", "raw-window-handle", "serde", "winapi"]
    );
  }

  #[test]
  fn discovers_bins_and_build_scripts() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
      root,
      "Cargo.toml",
      "[package]\nname = \"tool\"\nbuild = \"gen/build.rs\"\n\n[[bin]]\nname = \"extra\"\npath = \"tools/extra.rs\"\n",
    );
    write(root, "src/main.rs", "fn main() {}");
    write(root, "src/bin/one.rs", "fn main() {}");
    write(root, "src/bin/two/main.rs", "fn main() {}");
    write(root, "src/bin/two/util.rs", "");

    let ws = load(root).unwrap();
    let targets = &ws.member("tool").unwrap().targets;

    assert_eq!(targets.lib, None);
    assert_eq!(
      targets.bins,
      vec!["src/bin/one.rs", "src/bin/two/main.rs", "src/main.rs", "tools/extra.rs"]
    );
    assert_eq!(targets.build_script.as_deref(), Some("gen/build.rs"));
  }

  #[test]
  fn discovers_declared_benches_tests_and_examples() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
      root,
      "Cargo.toml",
      r#"[package]
name = "cave"

[lib]
crate-type = ["cdylib"]

[[bench]]
name = "dsp"
harness = false

[[bench]]
name = "oversample"

[[test]]
name = "render"
path = "checks/render.rs"

[[example]]
name = "offline"
"#,
    );
    write(root, "src/lib.rs", "");
    write(root, "benches/oversample/main.rs", "fn main() {}");
    write(root, "tests/loose.rs", "");

    let ws = load(root).unwrap();
    let targets = &ws.member("cave").unwrap().targets;

    assert_eq!(
      targets.auxiliary,
      vec![
        "benches/dsp.rs",
        "benches/oversample/main.rs",
        "checks/render.rs",
        "examples/offline.rs"
      ]
    );
    assert!(targets.bins.is_empty());
  }

  #[test]
  fn duplicate_package_names_are_rejected() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "Cargo.toml", "[workspace]\nmembers = [\"a\", \"b\"]\n");
    write(root, "a/Cargo.toml", "[package]\nname = \"cave\"\n");
    write(root, "b/Cargo.toml", "[package]\nname = \"cave\"\n");

    assert!(matches!(load(root), Err(WorkspaceError::DuplicatePackage { .. })));
  }

  #[test]
  fn missing_root_manifest_is_an_error() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "src/lib.rs", "");

    assert!(matches!(load(temp.path()), Err(WorkspaceError::MissingRootManifest)));
  }

  #[test]
  fn virtual_manifest_without_members_is_empty() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "Cargo.toml", "[workspace]\nmembers = []\n");

    assert!(matches!(load(temp.path()), Err(WorkspaceError::Empty)));
  }
}
