//! Source closure resolution.
//!
//! A source closure is the ordered set of files a workspace build may read. It is
//! resolved from the tree on disk with previous build outputs and version-control
//! metadata filtered out, so two checkouts of the same revision resolve to the
//! same closure regardless of what has been built in them.
//!
//! The closure also knows which of its entries describe the dependency graph
//! (manifests, the lock file, cargo config, toolchain pins). Their combined hash,
//! the *structure hash*, is what the dependency cache keys on: editing a `.rs`
//! file changes the closure hash but not the structure hash.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::consts::{CARGO_LOCK, CARGO_TOML};
use crate::util::hash::{ContentHash, HashError, hash_bytes, hash_file};
use crate::workspace::Workspace;

/// Directory names never descended into.
pub const DEFAULT_EXCLUDES: &[&str] = &["target", ".git", ".hg", ".svn", ".jj", ".direnv"];

#[derive(Debug, Error)]
pub enum ClosureError {
  #[error("source root {path} is not a readable directory")]
  InvalidRoot { path: PathBuf },

  #[error("failed to walk source tree: {0}")]
  Walk(#[from] walkdir::Error),

  #[error("failed to hash source file: {0}")]
  Hash(#[from] HashError),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
  File,
  Symlink { target: PathBuf },
}

/// One file of the closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
  /// Path relative to the workspace root, `/`-separated.
  pub path: String,
  /// Content hash (symlinks hash their target path).
  pub hash: ContentHash,
  pub kind: EntryKind,
  /// Where the file lives on disk.
  #[serde(skip)]
  pub origin: PathBuf,
}

impl SourceFile {
  /// Whether this entry takes part in dependency resolution.
  pub fn is_manifest(&self) -> bool {
    is_manifest_path(&self.path)
  }
}

fn is_manifest_path(rel: &str) -> bool {
  let name = rel.rsplit('/').next().unwrap_or(rel);
  name == CARGO_TOML
    || rel == CARGO_LOCK
    || rel == ".cargo/config"
    || rel == ".cargo/config.toml"
    || rel == "rust-toolchain"
    || rel == "rust-toolchain.toml"
}

/// `result` / `result-*` links are build outputs left behind by the packaging step
/// of other build tools.
fn is_output_link(name: &str) -> bool {
  name == "result" || name.starts_with("result-")
}

#[derive(Debug, Clone)]
pub struct SourceClosure {
  root: PathBuf,
  files: BTreeMap<String, SourceFile>,
}

impl SourceClosure {
  /// Resolve the closure of `root`.
  ///
  /// `extra_excludes` are paths relative to `root` (e.g. an output directory that
  /// lives inside the workspace) dropped along with everything below them.
  pub fn resolve(root: &Path, extra_excludes: &[String]) -> Result<Self, ClosureError> {
    if !root.is_dir() {
      return Err(ClosureError::InvalidRoot {
        path: root.to_path_buf(),
      });
    }

    let walker = WalkDir::new(root)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| !is_excluded(root, e, extra_excludes));

    let mut files = BTreeMap::new();

    for entry in walker {
      let entry = entry?;
      let file_type = entry.file_type();
      if file_type.is_dir() {
        continue;
      }

      let rel = relative_path(root, entry.path());
      let kind = if file_type.is_symlink() {
        let target = fs::read_link(entry.path()).map_err(|source| ClosureError::Read {
          path: entry.path().to_path_buf(),
          source,
        })?;
        EntryKind::Symlink { target }
      } else if file_type.is_file() {
        EntryKind::File
      } else {
        trace!(path = %rel, "skipping special file");
        continue;
      };

      let hash = match &kind {
        EntryKind::File => hash_file(entry.path())?,
        EntryKind::Symlink { target } => hash_bytes(target.to_string_lossy().as_bytes()),
      };

      files.insert(
        rel.clone(),
        SourceFile {
          path: rel,
          hash,
          kind,
          origin: entry.path().to_path_buf(),
        },
      );
    }

    debug!(root = %root.display(), files = files.len(), "resolved source closure");

    Ok(Self {
      root: root.to_path_buf(),
      files,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// All entries, ordered by path.
  pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
    self.files.values()
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn get(&self, rel: &str) -> Option<&SourceFile> {
    self.files.get(rel)
  }

  pub fn contains(&self, rel: &str) -> bool {
    self.files.contains_key(rel)
  }

  /// Entries that describe the dependency graph.
  pub fn manifests(&self) -> impl Iterator<Item = &SourceFile> {
    self.files.values().filter(|f| f.is_manifest())
  }

  /// Read an entry's bytes from disk.
  pub fn read(&self, rel: &str) -> Result<Option<Vec<u8>>, ClosureError> {
    let Some(file) = self.files.get(rel) else {
      return Ok(None);
    };

    fs::read(&file.origin).map(Some).map_err(|source| ClosureError::Read {
      path: file.origin.clone(),
      source,
    })
  }

  /// Read an entry as UTF-8 text.
  pub fn read_to_string(&self, rel: &str) -> Result<Option<String>, ClosureError> {
    let Some(file) = self.files.get(rel) else {
      return Ok(None);
    };

    fs::read_to_string(&file.origin)
      .map(Some)
      .map_err(|source| ClosureError::Read {
        path: file.origin.clone(),
        source,
      })
  }

  /// Hash over every entry's path and content.
  pub fn hash(&self) -> ContentHash {
    digest_entries(self.files.values())
  }

  /// Hash over the manifest-like entries only.
  pub fn structure_hash(&self) -> ContentHash {
    digest_entries(self.manifests())
  }

  /// Copy every entry into `dest`, which must not contain anything else the build
  /// could pick up.
  pub fn materialize(&self, dest: &Path) -> Result<(), ClosureError> {
    for file in self.files.values() {
      copy_entry(file, &dest.join(&file.path))?;
    }
    debug!(dest = %dest.display(), files = self.files.len(), "materialized source closure");
    Ok(())
  }

  /// Copy only the manifest-like entries into `dest` and stub every target the
  /// workspace declares, so a build resolves and compiles the exact dependency
  /// graph without compiling any real workspace code.
  pub fn materialize_skeleton(&self, dest: &Path, workspace: &Workspace) -> Result<(), ClosureError> {
    for file in self.manifests() {
      copy_entry(file, &dest.join(&file.path))?;
    }

    let mut stubs = 0;
    for member in workspace.members() {
      if let Some(lib) = &member.targets.lib {
        write_stub(&dest.join(lib), "")?;
        stubs += 1;
      }
      for bin in &member.targets.bins {
        write_stub(&dest.join(bin), "fn main() {}\n")?;
        stubs += 1;
      }
      if let Some(build) = &member.targets.build_script {
        write_stub(&dest.join(build), "fn main() {}\n")?;
        stubs += 1;
      }
      for target in &member.targets.auxiliary {
        write_stub(&dest.join(target), "fn main() {}\n")?;
        stubs += 1;
      }
    }

    debug!(dest = %dest.display(), stubs, "materialized dependency skeleton");
    Ok(())
  }
}

fn is_excluded(root: &Path, entry: &walkdir::DirEntry, extra_excludes: &[String]) -> bool {
  if entry.depth() == 0 {
    return false;
  }

  let name = entry.file_name().to_string_lossy();
  if entry.file_type().is_dir() && DEFAULT_EXCLUDES.contains(&name.as_ref()) {
    return true;
  }
  if entry.path_is_symlink() && is_output_link(&name) {
    return true;
  }

  let rel = relative_path(root, entry.path());
  extra_excludes
    .iter()
    .map(|ex| ex.trim_end_matches('/'))
    .any(|ex| rel == ex || rel.starts_with(&format!("{}/", ex)))
}

fn relative_path(root: &Path, path: &Path) -> String {
  path
    .strip_prefix(root)
    .unwrap_or(path)
    .to_string_lossy()
    .replace('\\', "/")
}

fn digest_entries<'a>(entries: impl Iterator<Item = &'a SourceFile>) -> ContentHash {
  let mut hasher = Sha256::new();
  for file in entries {
    hasher.update(file.path.as_bytes());
    hasher.update(b":");
    hasher.update(file.hash.0.as_bytes());
    hasher.update(b"\n");
  }
  ContentHash(hex::encode(hasher.finalize()))
}

fn ensure_parent(path: &Path) -> Result<(), ClosureError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|source| ClosureError::Write {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  Ok(())
}

fn copy_entry(file: &SourceFile, dest: &Path) -> Result<(), ClosureError> {
  ensure_parent(dest)?;
  let write_err = |source| ClosureError::Write {
    path: dest.to_path_buf(),
    source,
  };

  match &file.kind {
    EntryKind::File => {
      fs::copy(&file.origin, dest).map_err(write_err)?;
    }
    EntryKind::Symlink { target } => {
      crate::util::fs::remove_path(dest).map_err(write_err)?;
      #[cfg(unix)]
      std::os::unix::fs::symlink(target, dest).map_err(write_err)?;
      #[cfg(windows)]
      std::os::windows::fs::symlink_file(target, dest).map_err(write_err)?;
    }
  }
  Ok(())
}

fn write_stub(dest: &Path, content: &str) -> Result<(), ClosureError> {
  ensure_parent(dest)?;
  fs::write(dest, content).map_err(|source| ClosureError::Write {
    path: dest.to_path_buf(),
    source,
  })
}
