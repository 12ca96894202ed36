//! Completion markers for published artifact sets.
//!
//! The marker is written last, after the tree hash is taken, so a directory
//! without one was never finished. Lookups only [`check`] the marker. Hashing
//! the whole tree is left to [`verify`], which garbage collection runs to find
//! entries modified after publishing.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::StoreError;
use crate::consts::COMPLETE_MARKER;
use crate::util::hash::{ContentHash, ObjectHash, hash_directory};

const MARKER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
  pub version: u32,
  pub status: String,
  pub key: ObjectHash,
  pub output_hash: ContentHash,
}

/// Hash the tree at `dir` and write its marker.
pub fn write(dir: &Path, key: &ObjectHash) -> Result<CompletionMarker, StoreError> {
  let marker = CompletionMarker {
    version: MARKER_VERSION,
    status: "complete".to_string(),
    key: key.clone(),
    output_hash: hash_directory(dir, &[COMPLETE_MARKER])?,
  };

  let path = dir.join(COMPLETE_MARKER);
  let content = serde_json::to_string(&marker).map_err(|source| StoreError::Marker {
    path: path.clone(),
    source,
  })?;
  fs::write(&path, format!("{}\n", content)).map_err(StoreError::io(&path))?;
  Ok(marker)
}

/// Read the marker in `dir`; `None` if there is none.
pub fn read(dir: &Path) -> Result<Option<CompletionMarker>, StoreError> {
  let path = dir.join(COMPLETE_MARKER);
  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => return Err(StoreError::Io { path, source }),
  };
  let marker = serde_json::from_str(&content).map_err(|source| StoreError::Marker { path, source })?;
  Ok(Some(marker))
}

/// The marker for `dir` if it records a finished set, without hashing the tree.
pub fn check(dir: &Path) -> Option<CompletionMarker> {
  let marker = match read(dir) {
    Ok(Some(marker)) => marker,
    Ok(None) => {
      debug!(path = %dir.display(), "no completion marker");
      return None;
    }
    Err(e) => {
      debug!(path = %dir.display(), error = %e, "unreadable completion marker");
      return None;
    }
  };

  if marker.version != MARKER_VERSION || marker.status != "complete" {
    debug!(path = %dir.display(), version = marker.version, "unsupported completion marker");
    return None;
  }
  Some(marker)
}

/// Like [`check`], and the tree must still hash to the recorded value.
pub fn verify(dir: &Path) -> Option<CompletionMarker> {
  let marker = check(dir)?;

  match hash_directory(dir, &[COMPLETE_MARKER]) {
    Ok(actual) if actual == marker.output_hash => Some(marker),
    Ok(actual) => {
      debug!(
        path = %dir.display(),
        expected = %marker.output_hash,
        actual = %actual,
        "artifact set hash mismatch"
      );
      None
    }
    Err(e) => {
      debug!(path = %dir.display(), error = %e, "failed to hash artifact set");
      None
    }
  }
}
