//! Implementation of the `plugpack info` command.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use plugpack_lib::PipelineError;
use plugpack_lib::bundle::{bundle_path, expected_artifact_path};
use plugpack_lib::config::{Config, Overrides};
use plugpack_lib::env::Environment;
use plugpack_lib::platform::paths::store_dir;
use plugpack_lib::util::hash::ObjectHash;

use super::{load_config, workspace_root};
use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Serialize)]
struct Info {
  version: &'static str,
  platform: String,
  workspace: PathBuf,
  store: PathBuf,
  cargo: PathBuf,
  environment: ObjectHash,
  config: Config,
  /// Where the library is looked for and where it is copied to, when a package is configured.
  expected_artifact: Option<PathBuf>,
  bundle: Option<PathBuf>,
}

pub fn cmd_info(workspace: &Path, output: OutputFormat) -> Result<()> {
  let root = workspace_root(workspace);
  let config = load_config(&root, Overrides::default())?;
  let env = Environment::provision(&config.environment).map_err(PipelineError::from)?;
  let format = config.bundle_format().map_err(PipelineError::from)?;

  let package = config.package.name.as_deref();
  let info = Info {
    version: env!("CARGO_PKG_VERSION"),
    platform: env.platform.triple(),
    store: store_dir(),
    cargo: env.cargo.clone(),
    environment: env.fingerprint().map_err(PipelineError::from)?,
    expected_artifact: package.map(|name| {
      expected_artifact_path(
        &root.join("target"),
        name,
        config.package.profile,
        env.platform.os,
      )
    }),
    bundle: package.map(|name| bundle_path(&config.output_root(&root), name, &format)),
    workspace: root,
    config,
  };

  if output.is_json() {
    return print_json(&info);
  }

  println!("plugpack v{}", info.version);
  print_stat("Platform", &info.platform);
  print_stat("Workspace", &info.workspace.display().to_string());
  print_stat("Store", &info.store.display().to_string());
  print_stat("Cargo", &info.cargo.display().to_string());
  print_stat("Environment", &info.environment.to_string());
  print_stat("Package", info.config.package.name.as_deref().unwrap_or("(not set)"));
  print_stat("Profile", info.config.package.profile.name());
  print_stat(
    "Bundle format",
    &format!("lib/{}/*.{}", info.config.bundle.kind, info.config.bundle.extension),
  );
  if let Some(path) = &info.expected_artifact {
    print_stat("Expected artifact", &path.display().to_string());
  }
  if let Some(path) = &info.bundle {
    print_stat("Bundle", &path.display().to_string());
  }

  Ok(())
}
