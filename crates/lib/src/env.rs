//! Build environment provisioning.
//!
//! The host environment is read exactly once, in [`Environment::provision`].
//! From then on the value is passed explicitly into every build, and commands
//! run with a cleared environment containing only what [`Environment::command_env`]
//! hands them.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EnvironmentConfig;
use crate::consts::{CARGO_ENV, SOURCE_DATE_EPOCH};
use crate::platform::Platform;
use crate::util::hash::{Hashable, ObjectHash};

const DEFAULT_CARGO: &str = "cargo";

#[derive(Debug, Error)]
pub enum EnvironmentError {
  #[error("unsupported platform: {os}/{arch}")]
  UnsupportedPlatform { os: &'static str, arch: &'static str },

  #[error("declared {kind} directory does not exist: {path}")]
  MissingDirectory { kind: &'static str, path: PathBuf },

  #[error("{var} cannot hold {path}: {source}")]
  InvalidSearchPath {
    var: &'static str,
    path: String,
    #[source]
    source: std::env::JoinPathsError,
  },

  #[error("failed to fingerprint environment: {0}")]
  Fingerprint(#[from] serde_json::Error),
}

/// Everything a build is allowed to see of the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
  /// Cargo program, either a bare name resolved on `search_path` or a path.
  pub cargo: PathBuf,
  pub search_path: Option<String>,
  pub home: Option<String>,
  pub cargo_home: Option<String>,
  pub rustup_home: Option<String>,
  pub rustup_toolchain: Option<String>,
  /// Native library directories for the link step.
  pub libraries: Vec<PathBuf>,
  pub pkg_config: Vec<PathBuf>,
  /// Host variables forwarded as-is. Unset ones are dropped.
  pub passthrough: BTreeMap<String, String>,
  pub platform: Platform,
}

/// The subset of the environment that can change compiled output.
#[derive(Serialize)]
struct Fingerprint<'a> {
  cargo: &'a Path,
  rustup_toolchain: Option<&'a str>,
  libraries: &'a [PathBuf],
  pkg_config: &'a [PathBuf],
  passthrough: &'a BTreeMap<String, String>,
  platform: String,
}

impl Hashable for Fingerprint<'_> {}

impl Environment {
  /// Build the environment from the host process and `config`.
  pub fn provision(config: &EnvironmentConfig) -> Result<Self, EnvironmentError> {
    Self::from_vars(config, |name| std::env::var(name).ok())
  }

  /// Build the environment from `config` and a variable lookup.
  ///
  /// The cargo program comes from `config.cargo`, then `PLUGPACK_CARGO`, then
  /// plain `cargo` on the search path.
  pub fn from_vars<F>(config: &EnvironmentConfig, var: F) -> Result<Self, EnvironmentError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let platform = Platform::current().ok_or(EnvironmentError::UnsupportedPlatform {
      os: std::env::consts::OS,
      arch: std::env::consts::ARCH,
    })?;

    let cargo = config
      .cargo
      .clone()
      .or_else(|| var(CARGO_ENV).filter(|v| !v.is_empty()).map(PathBuf::from))
      .unwrap_or_else(|| PathBuf::from(DEFAULT_CARGO));

    let mut passthrough = BTreeMap::new();
    for name in &config.passthrough {
      match var(name) {
        Some(value) => {
          passthrough.insert(name.clone(), value);
        }
        None => warn!(var = %name, "passthrough variable is not set on the host"),
      }
    }

    let env = Self {
      cargo,
      search_path: var("PATH"),
      home: var("HOME").or_else(|| var("USERPROFILE")),
      cargo_home: var("CARGO_HOME"),
      rustup_home: var("RUSTUP_HOME"),
      rustup_toolchain: var("RUSTUP_TOOLCHAIN"),
      libraries: config.libraries.clone(),
      pkg_config: config.pkg_config.clone(),
      passthrough,
      platform,
    };

    debug!(
      cargo = %env.cargo.display(),
      platform = %env.platform.triple(),
      libraries = env.libraries.len(),
      "provisioned build environment"
    );
    Ok(env)
  }

  /// Check that every declared native directory exists.
  pub fn validate(&self) -> Result<(), EnvironmentError> {
    let declared = self
      .libraries
      .iter()
      .map(|p| ("library", p))
      .chain(self.pkg_config.iter().map(|p| ("pkg-config", p)));

    for (kind, path) in declared {
      if !path.is_dir() {
        return Err(EnvironmentError::MissingDirectory {
          kind,
          path: path.clone(),
        });
      }
    }
    Ok(())
  }

  pub fn fingerprint(&self) -> Result<ObjectHash, EnvironmentError> {
    let input = Fingerprint {
      cargo: &self.cargo,
      rustup_toolchain: self.rustup_toolchain.as_deref(),
      libraries: &self.libraries,
      pkg_config: &self.pkg_config,
      passthrough: &self.passthrough,
      platform: self.platform.triple(),
    };
    Ok(input.compute_hash()?)
  }

  /// The complete variable set for a build writing into `target_dir`.
  pub fn command_env(&self, target_dir: &Path) -> Result<BTreeMap<String, OsString>, EnvironmentError> {
    let mut vars = self.tool_env()?;
    vars.insert("CARGO_TARGET_DIR".to_string(), target_dir.into());
    Ok(vars)
  }

  /// The variable set for any toolchain command, without a target directory.
  pub fn tool_env(&self) -> Result<BTreeMap<String, OsString>, EnvironmentError> {
    let mut vars: BTreeMap<String, OsString> = BTreeMap::new();

    let optional = [
      ("PATH", &self.search_path),
      ("HOME", &self.home),
      ("CARGO_HOME", &self.cargo_home),
      ("RUSTUP_HOME", &self.rustup_home),
      ("RUSTUP_TOOLCHAIN", &self.rustup_toolchain),
    ];
    for (name, value) in optional {
      if let Some(value) = value {
        vars.insert(name.to_string(), value.into());
      }
    }

    for (name, value) in &self.passthrough {
      vars.insert(name.clone(), value.into());
    }

    if !self.libraries.is_empty() {
      let joined = join_search_path("LIBRARY_PATH", &self.libraries)?;
      vars.insert("LIBRARY_PATH".to_string(), joined.clone());

      // On Windows the loader searches PATH, which must keep the tool directories.
      let loader = self.platform.os.loader_path_var();
      let loader_value = match vars.get(loader) {
        Some(existing) => {
          let mut dirs = self.libraries.clone();
          dirs.extend(std::env::split_paths(existing));
          join_search_path(loader, &dirs)?
        }
        None => joined,
      };
      vars.insert(loader.to_string(), loader_value);
    }
    if !self.pkg_config.is_empty() {
      vars.insert(
        "PKG_CONFIG_PATH".to_string(),
        join_search_path("PKG_CONFIG_PATH", &self.pkg_config)?,
      );
    }

    vars.insert("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.into());
    vars.insert("LANG".to_string(), "C".into());
    vars.insert("LC_ALL".to_string(), "C".into());

    Ok(vars)
  }
}

fn join_search_path(var: &'static str, dirs: &[PathBuf]) -> Result<OsString, EnvironmentError> {
  std::env::join_paths(dirs).map_err(|source| EnvironmentError::InvalidSearchPath {
    var,
    path: dirs
      .iter()
      .map(|d| d.display().to_string())
      .collect::<Vec<_>>()
      .join(", "),
    source,
  })
}
