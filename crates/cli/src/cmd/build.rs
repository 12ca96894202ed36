//! Implementation of the `plugpack build` command.

use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use plugpack_lib::PipelineError;
use plugpack_lib::config::Overrides;
use plugpack_lib::env::Environment;
use plugpack_lib::pipeline::{Pipeline, PipelineReport};
use plugpack_lib::store::FsArtifactStore;
use plugpack_lib::store_lock::{LockMode, StoreLock};
use plugpack_lib::toolchain::CargoToolchain;

use super::{load_config, workspace_root};
use crate::BuildArgs;
use crate::output::{OutputFormat, format_bytes, format_duration, print_json, print_stat, print_success};

#[derive(Serialize)]
struct BuildOutput<'a> {
  #[serde(flatten)]
  report: &'a PipelineReport,
  duration_ms: u128,
}

/// Run the whole pipeline and report where the bundle landed.
///
/// Holds a shared store lock for the duration so `gc` cannot remove the
/// dependency set mid-build.
pub fn cmd_build(args: &BuildArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let root = workspace_root(&args.workspace.workspace);
  let config = load_config(
    &root,
    Overrides {
      package: args.package.clone(),
      profile: args.profile,
      kind: args.kind.clone(),
      extension: args.extension.clone(),
      output: args.out.clone(),
    },
  )?;

  let env = Environment::provision(&config.environment).map_err(PipelineError::from)?;
  let store = FsArtifactStore::open_default();
  let _lock = StoreLock::acquire(store.root(), LockMode::Shared, "build").map_err(PipelineError::from)?;

  let toolchain = CargoToolchain;
  let pipeline = Pipeline::new(env, &toolchain, &store, store.work_dir()).exclude(store.root());
  let report = pipeline.run(&root, &config)?;
  let elapsed = start.elapsed();

  if output.is_json() {
    print_json(&BuildOutput {
      report: &report,
      duration_ms: elapsed.as_millis(),
    })?;
  } else {
    print_success(&format!("Packaged {} ({})", report.package, report.profile));
    print_stat("Bundle", &report.bundle.path.display().to_string());
    print_stat("Size", &format_bytes(report.bundle.size));
    print_stat("Dependency key", &report.dependency_key.to_string());
    print_stat("Cache hit", if report.cache_hit { "yes" } else { "no" });
    print_stat("Duration", &format_duration(elapsed));
  }

  Ok(())
}
