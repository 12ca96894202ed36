//! In-process artifact store for tests and one-shot runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tempfile::TempDir;

use super::{ArtifactSet, ArtifactStore, StagedArtifacts, StoreError, TARGET_DIR};
use crate::util::hash::{ObjectHash, hash_directory};

/// Keeps every published set in its own temporary directory for the lifetime
/// of the store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
  inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  entries: BTreeMap<ObjectHash, (TempDir, ArtifactSet)>,
  publishes: usize,
}

impl MemoryArtifactStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// How many sets were actually published (discarded duplicates excluded).
  pub fn publishes(&self) -> usize {
    self.lock().publishes
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl ArtifactStore for MemoryArtifactStore {
  fn get(&self, key: &ObjectHash) -> Result<Option<ArtifactSet>, StoreError> {
    Ok(self.lock().entries.get(key).map(|(_, set)| set.clone()))
  }

  fn stage(&self, key: &ObjectHash) -> Result<StagedArtifacts, StoreError> {
    let dir = TempDir::new().map_err(|source| StoreError::Io {
      path: std::env::temp_dir(),
      source,
    })?;
    let target = dir.path().join(TARGET_DIR);
    std::fs::create_dir_all(&target).map_err(StoreError::io(&target))?;
    Ok(StagedArtifacts::new(key.clone(), dir))
  }

  fn publish(&self, staged: StagedArtifacts) -> Result<ArtifactSet, StoreError> {
    let (key, dir) = staged.into_parts();
    let mut inner = self.lock();
    if let Some((_, existing)) = inner.entries.get(&key) {
      return Ok(existing.clone());
    }

    let set = ArtifactSet {
      key: key.clone(),
      path: dir.path().to_path_buf(),
      output_hash: hash_directory(dir.path(), &[])?,
    };
    inner.entries.insert(key, (dir, set.clone()));
    inner.publishes += 1;
    Ok(set)
  }

  fn entries(&self) -> Result<Vec<ArtifactSet>, StoreError> {
    Ok(self.lock().entries.values().map(|(_, set)| set.clone()).collect())
  }
}
