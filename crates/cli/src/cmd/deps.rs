//! Implementation of the `plugpack deps` command.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;

use plugpack_lib::PipelineError;
use plugpack_lib::config::Overrides;
use plugpack_lib::env::Environment;
use plugpack_lib::pipeline::Pipeline;
use plugpack_lib::profile::Profile;
use plugpack_lib::store::FsArtifactStore;
use plugpack_lib::store_lock::{LockMode, StoreLock};
use plugpack_lib::toolchain::CargoToolchain;

use super::{load_config, workspace_root};
use crate::output::{OutputFormat, format_duration, print_cache_line, print_json, print_stat, print_success};

pub fn cmd_deps(workspace: &Path, profile: Option<Profile>, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let root = workspace_root(workspace);
  let config = load_config(
    &root,
    Overrides {
      profile,
      ..Default::default()
    },
  )?;

  let env = Environment::provision(&config.environment).map_err(PipelineError::from)?;
  let store = FsArtifactStore::open_default();
  let _lock = StoreLock::acquire(store.root(), LockMode::Shared, "deps").map_err(PipelineError::from)?;

  let toolchain = CargoToolchain;
  let pipeline = Pipeline::new(env, &toolchain, &store, store.work_dir()).exclude(store.root());
  let prepared = pipeline.prepare(&root, &config)?;
  let deps = pipeline.dependencies(&prepared, &config)?;

  if output.is_json() {
    print_json(&deps)?;
  } else {
    print_success("Dependencies ready");
    print_cache_line(deps.cached, &deps.key().to_string());
    print_stat("Path", &deps.set.path.display().to_string());
    print_stat(
      "Lock",
      &format!(
        "{} packages, {} members, {} transitive",
        deps.lock.packages, deps.lock.members, deps.lock.transitive
      ),
    );
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
