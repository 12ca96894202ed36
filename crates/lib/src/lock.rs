//! Lock descriptor: the parsed `Cargo.lock` of a workspace.
//!
//! The lock is the dependency cache's identity. Its raw bytes are hashed into the
//! cache key, and before anything is built it is checked against the workspace:
//! every package must be pinned, every reference inside the lock must resolve, and
//! every dependency a member declares must be present.
//!
//! ```toml
//! version = 4
//!
//! [[package]]
//! name = "cave"
//! version = "0.1.0"
//! dependencies = ["clack-plugin"]
//!
//! [[package]]
//! name = "clack-plugin"
//! version = "0.1.0"
//! source = "git+https://github.com/prokopyl/clack#57e89b3"
//! ```

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::closure::{ClosureError, SourceClosure};
use crate::consts::CARGO_LOCK;
use crate::util::hash::{ContentHash, hash_bytes};
use crate::workspace::Workspace;

/// Lock file format versions this parser understands. Version 2 files carry no
/// `version` key.
pub const SUPPORTED_VERSIONS: &[u32] = &[3, 4];

#[derive(Debug, Error)]
pub enum LockError {
  #[error("no {CARGO_LOCK} at the workspace root; generate one with `cargo generate-lockfile`")]
  NotFound,

  #[error(transparent)]
  Read(#[from] ClosureError),

  #[error("{CARGO_LOCK} is not valid: {0}")]
  Parse(#[source] toml::de::Error),

  #[error("unsupported {CARGO_LOCK} version {0}")]
  UnsupportedVersion(u32),

  #[error("{CARGO_LOCK} uses the legacy [metadata] checksum table; regenerate it with a current cargo")]
  LegacyFormat,

  #[error("package {name} {version} from {origin} is not pinned ({reason})")]
  Unpinned {
    name: String,
    version: String,
    origin: String,
    reason: &'static str,
  },

  #[error("workspace member `{0}` is missing from {CARGO_LOCK}")]
  MissingMember(String),

  #[error("`{member}` depends on `{dependency}`, which {CARGO_LOCK} does not contain")]
  UndeclaredDependency { member: String, dependency: String },

  #[error("package {package} references `{reference}`, which {CARGO_LOCK} does not contain")]
  DanglingReference { package: String, reference: String },
}

#[derive(Debug, Deserialize)]
struct RawLock {
  version: Option<u32>,
  #[serde(default)]
  package: Vec<LockedPackage>,
  metadata: Option<toml::Value>,
}

/// One `[[package]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
  pub name: String,
  pub version: String,
  pub source: Option<String>,
  pub checksum: Option<String>,
  #[serde(default)]
  pub dependencies: Vec<String>,
}

impl LockedPackage {
  /// Workspace and path packages carry no source.
  pub fn is_local(&self) -> bool {
    self.source.is_none()
  }

  fn pin_problem(&self) -> Option<&'static str> {
    let source = self.source.as_deref()?;
    if source.starts_with("registry+") || source.starts_with("sparse+") {
      if self.checksum.as_deref().is_none_or(str::is_empty) {
        return Some("registry package without checksum");
      }
    } else if let Some(rest) = source.strip_prefix("git+") {
      if rest.rsplit_once('#').is_none_or(|(_, rev)| rev.is_empty()) {
        return Some("git package without a locked revision");
      }
    } else {
      return Some("unknown source kind");
    }
    None
  }
}

/// The immutable, parsed lock file plus the hash of its exact bytes.
#[derive(Debug, Clone)]
pub struct LockDescriptor {
  hash: ContentHash,
  version: Option<u32>,
  packages: Vec<LockedPackage>,
}

/// Counts gathered while checking a lock against its workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockSummary {
  pub packages: usize,
  pub members: usize,
  /// Non-workspace packages reachable from the members.
  pub transitive: usize,
}

impl LockDescriptor {
  /// Read `Cargo.lock` from the closure root.
  pub fn load(closure: &SourceClosure) -> Result<Self, LockError> {
    let bytes = closure.read(CARGO_LOCK)?.ok_or(LockError::NotFound)?;
    Self::parse(&bytes)
  }

  pub fn parse(bytes: &[u8]) -> Result<Self, LockError> {
    let text = String::from_utf8_lossy(bytes);
    let raw: RawLock = toml::from_str(&text).map_err(LockError::Parse)?;

    if raw.metadata.is_some() {
      return Err(LockError::LegacyFormat);
    }
    if let Some(version) = raw.version
      && !SUPPORTED_VERSIONS.contains(&version)
    {
      return Err(LockError::UnsupportedVersion(version));
    }

    Ok(Self {
      hash: hash_bytes(bytes),
      version: raw.version,
      packages: raw.package,
    })
  }

  /// Hash of the raw lock bytes.
  pub fn hash(&self) -> &ContentHash {
    &self.hash
  }

  pub fn version(&self) -> Option<u32> {
    self.version
  }

  pub fn packages(&self) -> &[LockedPackage] {
    &self.packages
  }

  /// Check the lock against the workspace's declared dependency graph.
  pub fn validate(&self, workspace: &Workspace) -> Result<LockSummary, LockError> {
    for pkg in &self.packages {
      if let Some(reason) = pkg.pin_problem() {
        return Err(LockError::Unpinned {
          name: pkg.name.clone(),
          version: pkg.version.clone(),
          origin: pkg.source.clone().unwrap_or_default(),
          reason,
        });
      }
    }

    let graph = LockGraph::build(&self.packages)?;

    let mut roots = Vec::new();
    for member in workspace.members() {
      let node = self
        .packages
        .iter()
        .position(|p| p.is_local() && p.name == member.name)
        .ok_or_else(|| LockError::MissingMember(member.name.clone()))?;
      roots.push(NodeIndex::new(node));

      for dependency in &member.dependencies {
        if !self.packages.iter().any(|p| &p.name == dependency) {
          return Err(LockError::UndeclaredDependency {
            member: member.name.clone(),
            dependency: dependency.clone(),
          });
        }
      }
    }

    let transitive = graph
      .reachable(&roots)
      .into_iter()
      .filter(|idx| !workspace.is_member(&self.packages[idx.index()].name))
      .count();

    let summary = LockSummary {
      packages: self.packages.len(),
      members: roots.len(),
      transitive,
    };
    debug!(?summary, "lock matches workspace");
    Ok(summary)
  }
}

/// Package graph of a lock file; node indices equal package positions.
struct LockGraph {
  graph: DiGraph<(), ()>,
}

impl LockGraph {
  fn build(packages: &[LockedPackage]) -> Result<Self, LockError> {
    let mut graph = DiGraph::with_capacity(packages.len(), packages.len());
    for _ in packages {
      graph.add_node(());
    }

    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, pkg) in packages.iter().enumerate() {
      by_name.entry(pkg.name.as_str()).or_default().push(idx);
    }

    for (idx, pkg) in packages.iter().enumerate() {
      for reference in &pkg.dependencies {
        let target = resolve_reference(packages, &by_name, reference).ok_or_else(|| LockError::DanglingReference {
          package: format!("{} {}", pkg.name, pkg.version),
          reference: reference.clone(),
        })?;
        graph.add_edge(NodeIndex::new(idx), NodeIndex::new(target), ());
      }
    }

    Ok(Self { graph })
  }

  fn reachable(&self, roots: &[NodeIndex]) -> Vec<NodeIndex> {
    let mut seen = vec![false; self.graph.node_count()];
    for root in roots {
      let mut dfs = Dfs::new(&self.graph, *root);
      while let Some(node) = dfs.next(&self.graph) {
        seen[node.index()] = true;
      }
    }
    seen
      .iter()
      .enumerate()
      .filter(|(_, hit)| **hit)
      .map(|(idx, _)| NodeIndex::new(idx))
      .collect()
  }
}

/// Resolve a `dependencies` entry: `name`, `name version`, or
/// `name version (source)`. The short forms are only written when unambiguous.
fn resolve_reference(packages: &[LockedPackage], by_name: &HashMap<&str, Vec<usize>>, reference: &str) -> Option<usize> {
  let mut parts = reference.splitn(3, ' ');
  let name = parts.next()?;
  let version = parts.next();
  let source = parts
    .next()
    .map(|s| s.trim_start_matches('(').trim_end_matches(')'));

  let candidates = by_name.get(name)?;
  candidates.iter().copied().find(|&idx| {
    let pkg = &packages[idx];
    version.is_none_or(|v| pkg.version == v) && source.is_none_or(|s| pkg.source.as_deref() == Some(s))
  })
}
