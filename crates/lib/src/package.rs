//! Scoped package builds.
//!
//! The target member is compiled in a throwaway work directory holding a copy
//! of the source closure, with the target directory seeded from the
//! dependency artifact set so only workspace code is compiled.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir};
use tracing::{debug, info, warn};

use crate::bundle::expected_artifact_path;
use crate::closure::SourceClosure;
use crate::consts::CARGO_TOML;
use crate::env::Environment;
use crate::error::{PipelineError, Stage};
use crate::profile::Profile;
use crate::store::ArtifactSet;
use crate::toolchain::{BuildScope, CargoInvocation, Toolchain, ToolchainError};
use crate::util::fs::copy_dir_all;
use crate::workspace::Workspace;

/// A finished package build. The work directory lives as long as this value.
#[derive(Debug)]
pub struct BuildOutput {
  work: TempDir,
  pub package: String,
  pub profile: Profile,
  pub target_dir: PathBuf,
  /// Where the compiler convention says the shared library is. Not checked.
  pub artifact: PathBuf,
}

impl BuildOutput {
  pub fn work_dir(&self) -> &Path {
    self.work.path()
  }
}

#[allow(clippy::too_many_arguments)]
pub fn build_package(
  closure: &SourceClosure,
  deps: &ArtifactSet,
  workspace: &Workspace,
  package: &str,
  env: &Environment,
  toolchain: &dyn Toolchain,
  work_root: &Path,
  profile: Profile,
) -> Result<BuildOutput, PipelineError> {
  let Some(member) = workspace.member(package) else {
    return Err(PipelineError::PackageBuildFailure {
      package: package.to_string(),
      message: format!(
        "not a workspace member (members: {})",
        workspace.member_names().join(", ")
      ),
    });
  };
  // Built anyway. The bundle stage reports the missing library with its expected path.
  if !member.declares_cdylib() {
    warn!(
      package,
      crate_types = ?member.crate_types,
      "manifest does not declare a cdylib, no shared library is expected"
    );
  }

  fs::create_dir_all(work_root).map_err(PipelineError::io(Stage::Package, work_root))?;
  let work = Builder::new()
    .prefix(&format!("{}-", package))
    .tempdir_in(work_root)
    .map_err(PipelineError::io(Stage::Package, work_root))?;

  let src = work.path().join("src");
  closure.materialize(&src)?;

  let target_dir = work.path().join("target");
  let seed = deps.target_dir();
  copy_dir_all(&seed, &target_dir).map_err(PipelineError::io(Stage::Package, &seed))?;
  debug!(from = %seed.display(), to = %target_dir.display(), "seeded target directory");

  let invocation = CargoInvocation {
    manifest_path: src.join(CARGO_TOML),
    target_dir: target_dir.clone(),
    profile,
    scope: BuildScope::Package(package.to_string()),
  };
  info!(package, profile = %profile, "building package");
  toolchain.build(&invocation, env).map_err(|err| match err {
    ToolchainError::NotFound { .. } | ToolchainError::Environment(_) => PipelineError::EnvironmentMissing(err.to_string()),
    ToolchainError::Failed { .. } | ToolchainError::Spawn { .. } => PipelineError::PackageBuildFailure {
      package: package.to_string(),
      message: err.to_string(),
    },
  })?;

  let artifact = expected_artifact_path(&target_dir, package, profile, env.platform.os);
  Ok(BuildOutput {
    work,
    package: package.to_string(),
    profile,
    target_dir,
    artifact,
  })
}
