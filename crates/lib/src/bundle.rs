//! Artifact location and repackaging.
//!
//! The compiler leaves a dynamic library at a path fixed by convention:
//! `<target>/<profile>/lib<crate>.<so|dylib>` (`<crate>.dll` on Windows, with
//! hyphens in the package name turned into underscores). Repackaging finds that
//! one file and copies it, unmodified, to
//! `<output>/lib/<kind>/<package>.<extension>` where a plugin host looks for it.
//!
//! Nothing about the library's contents is inspected.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::platform::os::Os;
use crate::profile::Profile;
use crate::util::hash::{ContentHash, HashError, hash_file};

#[derive(Debug, Error)]
pub enum BundleError {
  #[error(
    "expected build output not found: {expected}\n\
     Package `{package}` did not produce a dynamic library. Either its manifest does not declare \
     `crate-type = [\"cdylib\"]` under [lib], or the package name does not match `{package}`."
  )]
  MissingArtifact { expected: PathBuf, package: String },

  #[error("failed to create {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to copy {from} to {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash bundle: {0}")]
  Hash(#[from] HashError),
}

/// Rejected bundle naming value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid bundle {field}: {reason}")]
pub struct InvalidFormat {
  pub field: &'static str,
  pub reason: String,
}

/// How a plugin host expects bundles to be named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleFormat {
  /// Directory under `lib/`, e.g. `clap`.
  pub kind: String,
  /// File extension without the dot, e.g. `clap`.
  pub extension: String,
}

impl Default for BundleFormat {
  fn default() -> Self {
    Self {
      kind: "clap".to_string(),
      extension: "clap".to_string(),
    }
  }
}

impl BundleFormat {
  pub fn new(kind: &str, extension: &str) -> Result<Self, InvalidFormat> {
    Ok(Self {
      kind: validate_component("kind", kind)?,
      extension: validate_component("extension", extension.trim_start_matches('.'))?,
    })
  }
}

fn validate_component(field: &'static str, value: &str) -> Result<String, InvalidFormat> {
  let reason = if value.is_empty() {
    "must not be empty"
  } else if value.contains(['/', '\\']) || value == "." || value == ".." {
    "must be a single path component"
  } else {
    return Ok(value.to_string());
  };

  Err(InvalidFormat {
    field,
    reason: format!("`{}` {}", value, reason),
  })
}

/// File name the compiler gives `package`'s dynamic library on `os`.
pub fn artifact_file_name(package: &str, os: Os) -> String {
  format!(
    "{}{}.{}",
    os.dylib_prefix(),
    package.replace('-', "_"),
    os.dylib_extension()
  )
}

/// Where the compiler leaves `package`'s dynamic library for `profile`.
pub fn expected_artifact_path(target_dir: &Path, package: &str, profile: Profile, os: Os) -> PathBuf {
  target_dir
    .join(profile.dir_name())
    .join(artifact_file_name(package, os))
}

/// Where the bundle for `package` goes under `output_root`.
pub fn bundle_path(output_root: &Path, package: &str, format: &BundleFormat) -> PathBuf {
  output_root
    .join("lib")
    .join(&format.kind)
    .join(format!("{}.{}", package, format.extension))
}

/// The packaged plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginBundle {
  pub path: PathBuf,
  pub size: u64,
  pub hash: ContentHash,
}

/// Copy the built library to its bundle location.
///
/// Fails with [`BundleError::MissingArtifact`] before touching `output_root` when
/// `artifact` is not a regular file. The copy is staged next to the destination
/// and renamed over it, so a reader sees either the previous bundle or the new
/// one.
pub fn repackage(
  artifact: &Path,
  package: &str,
  output_root: &Path,
  format: &BundleFormat,
) -> Result<PluginBundle, BundleError> {
  let is_file = fs::metadata(artifact).map(|m| m.is_file()).unwrap_or(false);
  if !is_file {
    return Err(BundleError::MissingArtifact {
      expected: artifact.to_path_buf(),
      package: package.to_string(),
    });
  }

  let dest = bundle_path(output_root, package, format);
  let dest_dir = dest.parent().unwrap_or(output_root);
  fs::create_dir_all(dest_dir).map_err(|source| BundleError::CreateDir {
    path: dest_dir.to_path_buf(),
    source,
  })?;

  let copy_err = |source| BundleError::Copy {
    from: artifact.to_path_buf(),
    to: dest.clone(),
    source,
  };

  let staged = NamedTempFile::new_in(dest_dir).map_err(copy_err)?;
  fs::copy(artifact, staged.path()).map_err(copy_err)?;
  set_bundle_permissions(staged.path()).map_err(copy_err)?;
  staged.persist(&dest).map_err(|e| copy_err(e.error))?;

  let size = fs::metadata(&dest).map_err(copy_err)?.len();
  let hash = hash_file(&dest)?;
  debug!(from = %artifact.display(), to = %dest.display(), size, "copied build output");
  info!(path = %dest.display(), "bundle written");

  Ok(PluginBundle { path: dest, size, hash })
}

#[cfg(unix)]
fn set_bundle_permissions(path: &Path) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_bundle_permissions(path: &Path) -> io::Result<()> {
  let mut permissions = fs::metadata(path)?.permissions();
  permissions.set_readonly(false);
  fs::set_permissions(path, permissions)
}
