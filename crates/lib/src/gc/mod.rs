//! Store garbage collection.
//!
//! Callers must hold the exclusive [`StoreLock`](crate::store_lock::StoreLock):
//! staging and work directories are only garbage when no build is running.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{FsArtifactStore, StoreError};
use crate::util::fs::{dir_size, remove_path};
use crate::util::hash::ObjectHash;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read store directory {path}: {source}")]
  ReadStore {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcOptions {
  /// Report what would be deleted without deleting it.
  pub dry_run: bool,
  /// Delete complete artifact sets too.
  pub all: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct GcStats {
  pub sets_scanned: usize,
  pub sets_deleted: usize,
  pub scratch_deleted: usize,
  pub bytes_freed: u64,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.sets_deleted + self.scratch_deleted
  }
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
  pub dry_run: bool,
}

pub fn collect_garbage(store: &FsArtifactStore, options: GcOptions) -> Result<GcResult, GcError> {
  let mut sweep = Sweep {
    dry_run: options.dry_run,
    stats: GcStats::default(),
    deleted_paths: Vec::new(),
  };

  for path in list_dirs(&store.deps_dir())? {
    sweep.stats.sets_scanned += 1;
    let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
      continue;
    };

    // Full verification: a set modified after publishing counts as incomplete.
    let complete = store.verify(&ObjectHash(name))?.is_some();
    if complete && !options.all {
      continue;
    }
    if complete {
      debug!(path = %path.display(), "removing artifact set");
    } else {
      debug!(path = %path.display(), "removing incomplete artifact set");
    }
    if sweep.remove(&path) {
      sweep.stats.sets_deleted += 1;
    }
  }

  for dir in [store.tmp_dir(), store.work_dir()] {
    for path in list_dirs(&dir)? {
      debug!(path = %path.display(), "removing stale scratch directory");
      if sweep.remove(&path) {
        sweep.stats.scratch_deleted += 1;
      }
    }
  }

  info!(
    sets_deleted = sweep.stats.sets_deleted,
    scratch_deleted = sweep.stats.scratch_deleted,
    bytes_freed = sweep.stats.bytes_freed,
    dry_run = options.dry_run,
    "garbage collection complete"
  );

  Ok(GcResult {
    stats: sweep.stats,
    deleted_paths: sweep.deleted_paths,
    dry_run: options.dry_run,
  })
}

struct Sweep {
  dry_run: bool,
  stats: GcStats,
  deleted_paths: Vec<PathBuf>,
}

impl Sweep {
  /// Delete `path` unless dry-running; `false` if deletion failed.
  fn remove(&mut self, path: &Path) -> bool {
    let size = dir_size(path);
    if !self.dry_run
      && let Err(e) = remove_path(path)
    {
      warn!(path = %path.display(), error = %e, "failed to delete");
      return false;
    }
    self.stats.bytes_freed += size;
    self.deleted_paths.push(path.to_path_buf());
    true
  }
}

fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, GcError> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(GcError::ReadStore {
        path: dir.to_path_buf(),
        source,
      });
    }
  };

  let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
  dirs.sort();
  Ok(dirs)
}
