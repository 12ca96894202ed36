//! Workspace configuration (`plugpack.toml`).
//!
//! The file is optional; every key has a default. Values given on the command
//! line take precedence over the file, which takes precedence over defaults.
//!
//! ```toml
//! [package]
//! name = "cave"
//! profile = "release"
//!
//! [bundle]
//! kind = "clap"
//! extension = "clap"
//! output = "result"
//!
//! [environment]
//! libraries = ["/usr/lib/x86_64-linux-gnu"]
//! pkg_config = ["/usr/lib/x86_64-linux-gnu/pkgconfig"]
//! passthrough = ["SSL_CERT_FILE"]
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bundle::BundleFormat;
use crate::consts::CONFIG_FILENAME;
use crate::profile::Profile;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid value for `{field}`: {reason}")]
  InvalidValue { field: &'static str, reason: String },

  #[error("no package to build: pass --package or set [package] name in {CONFIG_FILENAME}")]
  NoPackage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub package: PackageConfig,
  pub bundle: BundleConfig,
  pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageConfig {
  /// Workspace member to package.
  pub name: Option<String>,
  pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleConfig {
  /// Plugin kind directory under `lib/` (e.g. `clap`).
  pub kind: String,
  /// File extension the host scans for.
  pub extension: String,
  /// Output root, relative to the workspace unless absolute.
  pub output: PathBuf,
}

impl Default for BundleConfig {
  fn default() -> Self {
    let format = BundleFormat::default();
    Self {
      kind: format.kind,
      extension: format.extension,
      output: PathBuf::from("result"),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
  /// Cargo program; `PLUGPACK_CARGO` and the search path apply when unset.
  pub cargo: Option<PathBuf>,
  /// Native library directories the link step needs.
  pub libraries: Vec<PathBuf>,
  /// pkg-config search directories.
  pub pkg_config: Vec<PathBuf>,
  /// Host environment variables forwarded into builds.
  pub passthrough: Vec<String>,
}

impl Config {
  /// Load `plugpack.toml` from `workspace_root`, or defaults when it is absent.
  pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
    let path = workspace_root.join(CONFIG_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Self::default());
      }
      Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.clone(),
      source,
    })?;
    config.bundle_format()?;

    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  /// The validated bundle naming convention.
  pub fn bundle_format(&self) -> Result<BundleFormat, ConfigError> {
    BundleFormat::new(&self.bundle.kind, &self.bundle.extension).map_err(|e| ConfigError::InvalidValue {
      field: e.field,
      reason: e.reason,
    })
  }

  /// Output root resolved against the workspace root.
  pub fn output_root(&self, workspace_root: &Path) -> PathBuf {
    if self.bundle.output.is_absolute() {
      self.bundle.output.clone()
    } else {
      workspace_root.join(&self.bundle.output)
    }
  }

  /// Apply command-line overrides on top of the file values.
  pub fn with_overrides(mut self, overrides: Overrides) -> Self {
    if let Some(name) = overrides.package {
      self.package.name = Some(name);
    }
    if let Some(profile) = overrides.profile {
      self.package.profile = profile;
    }
    if let Some(kind) = overrides.kind {
      self.bundle.kind = kind;
    }
    if let Some(extension) = overrides.extension {
      self.bundle.extension = extension;
    }
    if let Some(output) = overrides.output {
      self.bundle.output = output;
    }
    self
  }

  /// The package to build; there is no default.
  pub fn package_name(&self) -> Result<&str, ConfigError> {
    self.package.name.as_deref().ok_or(ConfigError::NoPackage)
  }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub package: Option<String>,
  pub profile: Option<Profile>,
  pub kind: Option<String>,
  pub extension: Option<String>,
  pub output: Option<PathBuf>,
}
