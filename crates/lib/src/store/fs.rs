//! Filesystem-backed artifact store.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{debug, info};

use super::{ArtifactSet, ArtifactStore, StagedArtifacts, StoreError, TARGET_DIR, marker};
use crate::platform::paths::store_dir;
use crate::util::hash::ObjectHash;

const DEPS_DIR: &str = "deps";
const TMP_DIR: &str = "tmp";
const WORK_DIR: &str = "work";

/// Artifact sets under `<root>/deps/<key>`, staged in `<root>/tmp`.
///
/// Staging and published entries share a filesystem so publishing is a single
/// rename.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
  root: PathBuf,
}

impl FsArtifactStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The store at `PLUGPACK_STORE`, or the user cache default.
  pub fn open_default() -> Self {
    Self::new(store_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn deps_dir(&self) -> PathBuf {
    self.root.join(DEPS_DIR)
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join(TMP_DIR)
  }

  /// Parent of per-invocation package build directories.
  pub fn work_dir(&self) -> PathBuf {
    self.root.join(WORK_DIR)
  }

  fn entry_path(&self, key: &ObjectHash) -> PathBuf {
    self.deps_dir().join(&key.0)
  }

  fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path).map_err(StoreError::io(path))
  }

  /// Like [`ArtifactStore::get`], but also re-hash the set and compare it with
  /// the hash recorded at publish time.
  pub fn verify(&self, key: &ObjectHash) -> Result<Option<ArtifactSet>, StoreError> {
    self.lookup(key, marker::verify)
  }

  fn lookup(
    &self,
    key: &ObjectHash,
    read_marker: fn(&Path) -> Option<marker::CompletionMarker>,
  ) -> Result<Option<ArtifactSet>, StoreError> {
    let path = self.entry_path(key);
    if !path.is_dir() {
      return Ok(None);
    }

    let Some(marker) = read_marker(&path) else {
      return Ok(None);
    };
    if &marker.key != key {
      debug!(path = %path.display(), recorded = %marker.key, "artifact set recorded under another key");
      return Ok(None);
    }

    Ok(Some(ArtifactSet {
      key: key.clone(),
      path,
      output_hash: marker.output_hash,
    }))
  }
}

impl ArtifactStore for FsArtifactStore {
  fn get(&self, key: &ObjectHash) -> Result<Option<ArtifactSet>, StoreError> {
    self.lookup(key, marker::check)
  }

  fn stage(&self, key: &ObjectHash) -> Result<StagedArtifacts, StoreError> {
    let tmp = self.tmp_dir();
    Self::ensure_dir(&tmp)?;

    let dir = Builder::new()
      .prefix(&format!("{}-", key))
      .tempdir_in(&tmp)
      .map_err(StoreError::io(&tmp))?;
    let target = dir.path().join(TARGET_DIR);
    Self::ensure_dir(&target)?;

    debug!(key = %key, path = %dir.path().display(), "staging artifact set");
    Ok(StagedArtifacts::new(key.clone(), dir))
  }

  fn publish(&self, staged: StagedArtifacts) -> Result<ArtifactSet, StoreError> {
    let (key, dir) = staged.into_parts();

    if let Some(existing) = self.get(&key)? {
      debug!(key = %key, "artifact set already published, discarding staged copy");
      return Ok(existing);
    }

    let written = marker::write(dir.path(), &key)?;

    let dest = self.entry_path(&key);
    Self::ensure_dir(&self.deps_dir())?;

    // The rename never replaces a populated directory, so a set another
    // process published in the meantime survives and is returned instead.
    let staged_path = dir.keep();
    if let Err(source) = fs::rename(&staged_path, &dest) {
      let _ = fs::remove_dir_all(&staged_path);
      if let Some(existing) = self.get(&key)? {
        debug!(key = %key, "artifact set published concurrently");
        return Ok(existing);
      }
      if dest.exists() {
        debug!(path = %dest.display(), error = %source, "entry path is occupied");
        return Err(StoreError::Occupied { path: dest });
      }
      return Err(StoreError::Io { path: dest, source });
    }

    info!(key = %key, path = %dest.display(), "published artifact set");
    Ok(ArtifactSet {
      key,
      path: dest,
      output_hash: written.output_hash,
    })
  }

  fn entries(&self) -> Result<Vec<ArtifactSet>, StoreError> {
    let deps = self.deps_dir();
    let read = match fs::read_dir(&deps) {
      Ok(read) => read,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => return Err(StoreError::Io { path: deps, source }),
    };

    let mut entries = Vec::new();
    for entry in read.flatten() {
      let Some(name) = entry.file_name().to_str().map(str::to_string) else {
        continue;
      };
      if let Some(set) = self.get(&ObjectHash(name))? {
        entries.push(set);
      }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
  }
}
