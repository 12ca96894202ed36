//! Pipeline error taxonomy.
//!
//! Every failure is fatal and carries the stage it happened in, so the CLI can
//! print `error in <stage> stage: ...` without knowing the module that failed.

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::bundle::BundleError;
use crate::closure::ClosureError;
use crate::config::ConfigError;
use crate::env::EnvironmentError;
use crate::lock::LockError;
use crate::store::StoreError;
use crate::store_lock::StoreLockError;
use crate::workspace::WorkspaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Config,
  Closure,
  Lock,
  Environment,
  Dependencies,
  Package,
  Bundle,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Config => "config",
      Self::Closure => "closure",
      Self::Lock => "lock",
      Self::Environment => "environment",
      Self::Dependencies => "dependencies",
      Self::Package => "package",
      Self::Bundle => "bundle",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("Cargo.lock does not match the workspace: {0}")]
  LockMismatch(#[from] LockError),

  #[error("dependency build failed: {0}")]
  DependencyBuildFailure(String),

  #[error("package `{package}` failed to build: {message}")]
  PackageBuildFailure { package: String, message: String },

  #[error(
    "expected build output not found: {expected}\n\
     Package `{package}` did not produce a dynamic library. Either its manifest does not declare \
     `crate-type = [\"cdylib\"]` under [lib], or the package name does not match `{package}`."
  )]
  MissingArtifact { expected: PathBuf, package: String },

  #[error("build environment incomplete: {0}")]
  EnvironmentMissing(String),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Closure(#[from] ClosureError),

  #[error(transparent)]
  Workspace(#[from] WorkspaceError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  StoreLock(#[from] StoreLockError),

  #[error(transparent)]
  Bundle(BundleError),

  #[error("failed to compute cache key: {0}")]
  CacheKey(#[from] serde_json::Error),

  #[error("{path}: {source}")]
  Io {
    stage: Stage,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl PipelineError {
  pub fn stage(&self) -> Stage {
    match self {
      Self::LockMismatch(_) => Stage::Lock,
      Self::DependencyBuildFailure(_) | Self::CacheKey(_) | Self::Store(_) | Self::StoreLock(_) => {
        Stage::Dependencies
      }
      Self::PackageBuildFailure { .. } => Stage::Package,
      Self::MissingArtifact { .. } | Self::Bundle(_) => Stage::Bundle,
      Self::EnvironmentMissing(_) => Stage::Environment,
      Self::Config(_) => Stage::Config,
      Self::Closure(_) | Self::Workspace(_) => Stage::Closure,
      Self::Io { stage, .. } => *stage,
    }
  }

  pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { stage, path, source }
  }
}

impl From<BundleError> for PipelineError {
  fn from(err: BundleError) -> Self {
    match err {
      BundleError::MissingArtifact { expected, package } => Self::MissingArtifact { expected, package },
      other => Self::Bundle(other),
    }
  }
}

impl From<EnvironmentError> for PipelineError {
  fn from(err: EnvironmentError) -> Self {
    Self::EnvironmentMissing(err.to_string())
  }
}
