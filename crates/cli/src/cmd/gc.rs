use std::time::Instant;

use anyhow::{Context, Result};

use plugpack_lib::gc::{GcOptions, collect_garbage};
use plugpack_lib::store::FsArtifactStore;
use plugpack_lib::store_lock::{LockMode, StoreLock};

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(dry_run: bool, all: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let store = FsArtifactStore::open_default();

  let _lock = StoreLock::acquire(store.root(), LockMode::Exclusive, "gc").context("Failed to acquire store lock")?;

  let result = collect_garbage(&store, GcOptions { dry_run, all })?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Dependency sets removed", &result.stats.sets_deleted.to_string());
    print_stat("Scratch dirs removed", &result.stats.scratch_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
