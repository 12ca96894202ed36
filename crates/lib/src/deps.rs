//! Lock-derived dependency cache.
//!
//! Third-party crates are compiled once per distinct cache key, from a
//! skeleton of the workspace: real manifests and lock file, stubbed sources.
//! The key hashes only what can change those compiled outputs, so editing
//! plugin code never invalidates it.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::closure::SourceClosure;
use crate::consts::CARGO_TOML;
use crate::env::Environment;
use crate::error::{PipelineError, Stage};
use crate::lock::{LockDescriptor, LockSummary};
use crate::profile::Profile;
use crate::store::{ArtifactSet, ArtifactStore};
use crate::toolchain::{BuildScope, CargoInvocation, Toolchain, ToolchainError};
use crate::util::hash::{ContentHash, Hashable, ObjectHash, hash_bytes};
use crate::workspace::Workspace;

const SKELETON_DIR: &str = "skeleton";

/// Target subdirectories where cargo names outputs `<crate>-<16 hex>`.
const HASHED_DIRS: &[&str] = &["deps", ".fingerprint", "build", "incremental"];

/// Inputs of the dependency cache key.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyKey {
  pub lock: ContentHash,
  pub structure: ContentHash,
  pub environment: ObjectHash,
  /// Digest of what the toolchain reports about itself.
  pub toolchain: ContentHash,
  pub profile: Profile,
}

impl Hashable for DependencyKey {}

impl DependencyKey {
  pub fn new(
    lock: &LockDescriptor,
    closure: &SourceClosure,
    env: &Environment,
    toolchain_version: &str,
    profile: Profile,
  ) -> Result<Self, PipelineError> {
    Ok(Self {
      lock: lock.hash().clone(),
      structure: closure.structure_hash(),
      environment: env.fingerprint()?,
      toolchain: hash_bytes(toolchain_version.as_bytes()),
      profile,
    })
  }

  pub fn hash(&self) -> Result<ObjectHash, PipelineError> {
    Ok(self.compute_hash()?)
  }
}

/// The dependency artifact set for a build, and whether it came from the cache.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyArtifacts {
  pub set: ArtifactSet,
  pub cached: bool,
  pub lock: LockSummary,
}

impl DependencyArtifacts {
  pub fn key(&self) -> &ObjectHash {
    &self.set.key
  }
}

/// Return the artifact set for the lock, building and publishing it on a miss.
///
/// A published set for the same key is returned without running the
/// toolchain. On a failed build the staging area is dropped and nothing is
/// published.
pub fn build_dependencies(
  closure: &SourceClosure,
  lock: &LockDescriptor,
  workspace: &Workspace,
  env: &Environment,
  toolchain: &dyn Toolchain,
  store: &dyn ArtifactStore,
  profile: Profile,
) -> Result<DependencyArtifacts, PipelineError> {
  let summary = lock.validate(workspace)?;
  let version = toolchain.version(env).map_err(dependency_failure)?;
  let key = DependencyKey::new(lock, closure, env, &version, profile)?.hash()?;

  if let Some(set) = store.get(&key)? {
    info!(key = %key, "dependency cache hit");
    return Ok(DependencyArtifacts {
      set,
      cached: true,
      lock: summary,
    });
  }

  info!(key = %key, packages = summary.transitive, "dependency cache miss, building");
  let staged = store.stage(&key)?;
  let skeleton = staged.path().join(SKELETON_DIR);
  closure.materialize_skeleton(&skeleton, workspace)?;

  let invocation = CargoInvocation {
    manifest_path: skeleton.join(CARGO_TOML),
    target_dir: staged.target_dir(),
    profile,
    scope: BuildScope::Workspace,
  };
  toolchain.build(&invocation, env).map_err(dependency_failure)?;

  let pruned = prune_member_outputs(&staged.target_dir(), profile, workspace)?;
  debug!(pruned, "removed workspace member outputs");
  fs::remove_dir_all(&skeleton).map_err(PipelineError::io(Stage::Dependencies, &skeleton))?;

  let set = store.publish(staged)?;
  Ok(DependencyArtifacts {
    set,
    cached: false,
    lock: summary,
  })
}

fn dependency_failure(err: ToolchainError) -> PipelineError {
  match err {
    ToolchainError::NotFound { .. } | ToolchainError::Environment(_) => PipelineError::EnvironmentMissing(err.to_string()),
    ToolchainError::Failed { .. } | ToolchainError::Spawn { .. } => {
      PipelineError::DependencyBuildFailure(err.to_string())
    }
  }
}

/// Delete the skeleton's own compiled outputs so the set holds only
/// third-party artifacts. Returns how many entries were removed.
fn prune_member_outputs(target_dir: &Path, profile: Profile, workspace: &Workspace) -> Result<usize, PipelineError> {
  let names: Vec<String> = workspace
    .members()
    .flat_map(|m| [m.name.clone(), m.name.replace('-', "_")])
    .collect();

  let profile_dir = target_dir.join(profile.dir_name());
  let mut removed = 0;

  removed += prune_dir(&profile_dir, |name| is_plain_output(name, &names))?;
  for sub in HASHED_DIRS {
    removed += prune_dir(&profile_dir.join(sub), |name| is_hashed_output(name, &names))?;
  }
  Ok(removed)
}

fn prune_dir(dir: &Path, matches: impl Fn(&str) -> bool) -> Result<usize, PipelineError> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
    Err(source) => {
      return Err(PipelineError::Io {
        stage: Stage::Dependencies,
        path: dir.to_path_buf(),
        source,
      });
    }
  };

  let mut removed = 0;
  for entry in entries.flatten() {
    let name = entry.file_name().to_string_lossy().into_owned();
    if !matches(&name) {
      continue;
    }
    let path = entry.path();
    crate::util::fs::remove_path(&path).map_err(PipelineError::io(Stage::Dependencies, &path))?;
    removed += 1;
  }
  Ok(removed)
}

/// `lib<crate>.rlib`, `<crate>.d` and friends directly under the profile dir.
fn is_plain_output(file_name: &str, names: &[String]) -> bool {
  let stem = file_name.split('.').next().unwrap_or(file_name);
  let unprefixed = stem.strip_prefix("lib").unwrap_or(stem);
  names.iter().any(|n| n == stem || n == unprefixed)
}

/// `lib<crate>-<16 hex>.rlib`, `<package>-<16 hex>/` and friends.
fn is_hashed_output(file_name: &str, names: &[String]) -> bool {
  let candidates = [file_name, file_name.strip_prefix("lib").unwrap_or(file_name)];
  candidates.iter().any(|candidate| {
    names.iter().any(|n| {
      candidate
        .strip_prefix(n.as_str())
        .and_then(|rest| rest.strip_prefix('-'))
        .map(|rest| {
          let hash = rest.split('.').next().unwrap_or(rest);
          hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit())
        })
        .unwrap_or(false)
    })
  })
}
