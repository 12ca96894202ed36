//! The build-and-package pipeline.
//!
//! A run is a straight line of blocking steps: resolve the source closure,
//! check the lock, fetch or build the dependency artifact set, build the
//! target package against it, and copy the resulting library into the output
//! layout. The first failure ends the run.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::bundle::{PluginBundle, repackage};
use crate::closure::SourceClosure;
use crate::config::Config;
use crate::deps::{DependencyArtifacts, build_dependencies};
use crate::env::Environment;
use crate::error::PipelineError;
use crate::lock::{LockDescriptor, LockSummary};
use crate::package::build_package;
use crate::profile::Profile;
use crate::store::ArtifactStore;
use crate::toolchain::Toolchain;
use crate::util::hash::{ContentHash, ObjectHash};
use crate::workspace::Workspace;

/// Everything read from the workspace before any build runs.
#[derive(Debug)]
pub struct Prepared {
  pub closure: SourceClosure,
  pub workspace: Workspace,
  pub lock: LockDescriptor,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
  pub package: String,
  pub profile: Profile,
  pub bundle: PluginBundle,
  pub dependency_key: ObjectHash,
  pub cache_hit: bool,
  pub lock: LockSummary,
  pub closure_files: usize,
  pub closure_hash: ContentHash,
}

pub struct Pipeline<'a> {
  env: Environment,
  toolchain: &'a dyn Toolchain,
  store: &'a dyn ArtifactStore,
  work_root: PathBuf,
  excludes: Vec<PathBuf>,
}

impl<'a> Pipeline<'a> {
  pub fn new(
    env: Environment,
    toolchain: &'a dyn Toolchain,
    store: &'a dyn ArtifactStore,
    work_root: impl Into<PathBuf>,
  ) -> Self {
    Self {
      env,
      toolchain,
      store,
      work_root: work_root.into(),
      excludes: Vec::new(),
    }
  }

  /// Keep `path` out of the source closure when it lies inside the workspace.
  pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
    self.excludes.push(path.into());
    self
  }

  pub fn environment(&self) -> &Environment {
    &self.env
  }

  /// Resolve the closure, workspace and lock for `root`.
  pub fn prepare(&self, root: &Path, config: &Config) -> Result<Prepared, PipelineError> {
    let output_root = config.output_root(root);
    let excludes: Vec<String> = self
      .excludes
      .iter()
      .chain([&output_root, &self.work_root])
      .filter_map(|path| relative_within(root, path))
      .collect();
    debug!(?excludes, "closure excludes");

    let closure = SourceClosure::resolve(root, &excludes)?;
    let workspace = Workspace::load(&closure)?;
    let lock = LockDescriptor::load(&closure)?;

    info!(
      files = closure.len(),
      hash = %closure.hash(),
      members = ?workspace.member_names(),
      "resolved source closure"
    );
    Ok(Prepared {
      closure,
      workspace,
      lock,
    })
  }

  /// Fetch or build the dependency artifact set only.
  pub fn dependencies(&self, prepared: &Prepared, config: &Config) -> Result<DependencyArtifacts, PipelineError> {
    self.env.validate()?;
    build_dependencies(
      &prepared.closure,
      &prepared.lock,
      &prepared.workspace,
      &self.env,
      self.toolchain,
      self.store,
      config.package.profile,
    )
  }

  /// Run the whole pipeline for the package named in `config`.
  pub fn run(&self, root: &Path, config: &Config) -> Result<PipelineReport, PipelineError> {
    let package = config.package_name()?.to_string();
    let format = config.bundle_format()?;
    let profile = config.package.profile;
    let output_root = config.output_root(root);
    self.env.validate()?;

    let prepared = self.prepare(root, config)?;
    if !prepared.workspace.is_member(&package) {
      return Err(PipelineError::PackageBuildFailure {
        message: format!(
          "not a workspace member (members: {})",
          prepared.workspace.member_names().join(", ")
        ),
        package,
      });
    }

    let deps = self.dependencies(&prepared, config)?;
    let output = build_package(
      &prepared.closure,
      &deps.set,
      &prepared.workspace,
      &package,
      &self.env,
      self.toolchain,
      &self.work_root,
      profile,
    )?;
    let bundle = repackage(&output.artifact, &package, &output_root, &format)?;

    info!(package = %package, bundle = %bundle.path.display(), cache_hit = deps.cached, "pipeline complete");
    Ok(PipelineReport {
      package,
      profile,
      bundle,
      dependency_key: deps.key().clone(),
      cache_hit: deps.cached,
      lock: deps.lock,
      closure_files: prepared.closure.len(),
      closure_hash: prepared.closure.hash(),
    })
  }
}

/// `path` relative to `root` with `/` separators, if it is inside `root`.
pub fn relative_within(root: &Path, path: &Path) -> Option<String> {
  let canonical = |p: &Path| dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
  let rel = path
    .strip_prefix(root)
    .ok()
    .map(Path::to_path_buf)
    .or_else(|| canonical(path).strip_prefix(canonical(root)).ok().map(Path::to_path_buf))?;

  let rel = rel.to_string_lossy().replace('\\', "/");
  (!rel.is_empty()).then_some(rel)
}
