//! Dependency artifact storage.
//!
//! An artifact set is a Cargo target directory holding the compiled
//! dependencies for one cache key. Sets are built in a staging area, then
//! published once and never modified afterwards.
//!
//! # Layout
//!
//! ```text
//! store/
//! ├── .lock                     # StoreLock
//! ├── deps/                     # Published artifact sets
//! │   └── <key>/
//! │       ├── target/
//! │       └── .plugpack-complete
//! ├── tmp/                      # Staging for sets being built
//! └── work/                     # Per-invocation package builds
//! ```

pub mod fs;
pub mod marker;
pub mod memory;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;

use crate::util::hash::{ContentHash, HashError, ObjectHash};

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

/// Subdirectory of an artifact set holding the Cargo target directory.
pub const TARGET_DIR: &str = "target";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid completion marker at {path}: {source}")]
  Marker {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("{path} holds an incomplete artifact set; run `plugpack gc` to remove it")]
  Occupied { path: PathBuf },

  #[error(transparent)]
  Hash(#[from] HashError),
}

impl StoreError {
  pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
    move |source| Self::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// A published, immutable dependency artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
  pub key: ObjectHash,
  pub path: PathBuf,
  pub output_hash: ContentHash,
}

impl ArtifactSet {
  pub fn target_dir(&self) -> PathBuf {
    self.path.join(TARGET_DIR)
  }
}

/// An artifact set under construction.
///
/// Dropping it without publishing deletes the staging directory.
#[derive(Debug)]
pub struct StagedArtifacts {
  key: ObjectHash,
  dir: TempDir,
}

impl StagedArtifacts {
  pub(crate) fn new(key: ObjectHash, dir: TempDir) -> Self {
    Self { key, dir }
  }

  pub fn key(&self) -> &ObjectHash {
    &self.key
  }

  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  pub fn target_dir(&self) -> PathBuf {
    self.dir.path().join(TARGET_DIR)
  }

  pub(crate) fn into_parts(self) -> (ObjectHash, TempDir) {
    (self.key, self.dir)
  }
}

/// Write-once, read-many storage for dependency artifact sets.
pub trait ArtifactStore {
  /// The published set for `key`, or `None` when absent or incomplete.
  fn get(&self, key: &ObjectHash) -> Result<Option<ArtifactSet>, StoreError>;

  /// A fresh staging area for building the set for `key`.
  fn stage(&self, key: &ObjectHash) -> Result<StagedArtifacts, StoreError>;

  /// Publish a staged set. If the key was published in the meantime, the
  /// staged copy is discarded and the existing set is returned.
  fn publish(&self, staged: StagedArtifacts) -> Result<ArtifactSet, StoreError>;

  /// Every valid published set.
  fn entries(&self) -> Result<Vec<ArtifactSet>, StoreError>;
}
