//! plugpack-lib: reproducible build-and-package pipeline for Rust audio plugins.
//!
//! A run turns a Cargo workspace into a host-loadable plugin bundle:
//! - `closure`: the exact set of source files a build may see
//! - `lock` / `workspace`: the pinned dependency graph and member manifests
//! - `deps`: third-party artifacts compiled once per lock, kept in a `store`
//! - `package`: the target member compiled against those artifacts
//! - `bundle`: the resulting shared library copied to `lib/<kind>/<name>.<ext>`
//!
//! [`pipeline::Pipeline`] drives the steps in order.

pub mod bundle;
pub mod closure;
pub mod config;
pub mod consts;
pub mod deps;
pub mod env;
pub mod error;
pub mod gc;
pub mod lock;
pub mod package;
pub mod pipeline;
pub mod platform;
pub mod profile;
pub mod store;
pub mod store_lock;
pub mod toolchain;
pub mod util;
pub mod workspace;

pub use error::{PipelineError, Stage};
