//! Implementation of the `plugpack closure` command.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use plugpack_lib::PipelineError;
use plugpack_lib::closure::{EntryKind, SourceClosure, SourceFile};
use plugpack_lib::config::Overrides;
use plugpack_lib::pipeline::relative_within;
use plugpack_lib::platform::paths::store_dir;
use plugpack_lib::util::hash::ContentHash;

use super::{load_config, workspace_root};
use crate::output::{OutputFormat, print_info, print_json, truncate_hash};

#[derive(Serialize)]
struct ClosureOutput<'a> {
  root: &'a Path,
  hash: ContentHash,
  structure_hash: ContentHash,
  files: Vec<&'a SourceFile>,
}

/// List every file a build of this workspace would see.
pub fn cmd_closure(workspace: &Path, output: OutputFormat) -> Result<()> {
  let root = workspace_root(workspace);
  let config = load_config(&root, Overrides::default())?;

  let excludes: Vec<String> = [config.output_root(&root), store_dir()]
    .iter()
    .filter_map(|path| relative_within(&root, path))
    .collect();
  let closure = SourceClosure::resolve(&root, &excludes).map_err(PipelineError::from)?;

  if output.is_json() {
    print_json(&ClosureOutput {
      root: closure.root(),
      hash: closure.hash(),
      structure_hash: closure.structure_hash(),
      files: closure.files().collect(),
    })?;
    return Ok(());
  }

  for file in closure.files() {
    match &file.kind {
      EntryKind::File => println!("{}  {}", truncate_hash(&file.hash.0), file.path),
      EntryKind::Symlink { target } => println!(
        "{}  {} -> {}",
        truncate_hash(&file.hash.0),
        file.path,
        target.display()
      ),
    }
  }
  print_info(&format!("{} files, closure {}", closure.len(), truncate_hash(&closure.hash().0)));

  Ok(())
}
