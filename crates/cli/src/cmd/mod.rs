mod build;
mod closure;
mod deps;
mod gc;
mod info;

use std::path::{Path, PathBuf};

use tracing::debug;

use plugpack_lib::PipelineError;
use plugpack_lib::config::{Config, Overrides};

pub use build::cmd_build;
pub use closure::cmd_closure;
pub use deps::cmd_deps;
pub use gc::cmd_gc;
pub use info::cmd_info;

/// The workspace directory as an absolute path, when it exists.
fn workspace_root(dir: &Path) -> PathBuf {
  dunce::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// `plugpack.toml` from `root` with command-line values on top.
fn load_config(root: &Path, overrides: Overrides) -> Result<Config, PipelineError> {
  let config = Config::load(root)?.with_overrides(overrides);
  debug!(workspace = %root.display(), package = ?config.package.name, "resolved configuration");
  Ok(config)
}
