//! The compiler seam.
//!
//! Builds go through the [`Toolchain`] trait so the pipeline can be driven by a
//! fake in tests. [`CargoToolchain`] spawns the real `cargo` with the isolated
//! environment from [`Environment::command_env`].

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;
use tracing::{debug, info};

use crate::env::{Environment, EnvironmentError};
use crate::profile::Profile;

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("toolchain program not found: {program}")]
  NotFound { program: PathBuf },

  #[error("failed to run {program}: {source}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("{program} exited with {}:\n{stderr}", exit_status(.code))]
  Failed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error(transparent)]
  Environment(#[from] EnvironmentError),
}

fn exit_status(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("status {code}"),
    None => "a signal".to_string(),
  }
}

/// What a single cargo run builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildScope {
  /// Every workspace member and its dependencies.
  Workspace,
  /// One member, by package name.
  Package(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CargoInvocation {
  pub manifest_path: PathBuf,
  pub target_dir: PathBuf,
  pub profile: Profile,
  pub scope: BuildScope,
}

impl CargoInvocation {
  /// Arguments after the program name. Always `--locked`, never tests.
  pub fn args(&self) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
      "build".into(),
      "--locked".into(),
      "--manifest-path".into(),
      self.manifest_path.clone().into(),
      "--target-dir".into(),
      self.target_dir.clone().into(),
    ];
    args.extend(self.profile.cargo_args().iter().map(OsString::from));
    match &self.scope {
      BuildScope::Workspace => args.push("--workspace".into()),
      BuildScope::Package(name) => {
        args.push("-p".into());
        args.push(name.into());
      }
    }
    args
  }

  /// Directory cargo runs in.
  pub fn working_dir(&self) -> &Path {
    self.manifest_path.parent().unwrap_or(Path::new("."))
  }
}

pub trait Toolchain {
  fn build(&self, invocation: &CargoInvocation, env: &Environment) -> Result<(), ToolchainError>;

  /// Identity of the compiler the builds would use, as reported by the
  /// toolchain itself. Two toolchains that report the same identity are
  /// expected to produce interchangeable artifacts.
  fn version(&self, env: &Environment) -> Result<String, ToolchainError>;
}

/// Runs the real cargo.
#[derive(Debug, Default, Clone, Copy)]
pub struct CargoToolchain;

impl Toolchain for CargoToolchain {
  fn build(&self, invocation: &CargoInvocation, env: &Environment) -> Result<(), ToolchainError> {
    let vars = env.command_env(&invocation.target_dir)?;
    let args = invocation.args();

    info!(scope = ?invocation.scope, profile = %invocation.profile, "running cargo");
    let output = run(&env.cargo, &args, &vars, invocation.working_dir())?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "cargo output");
    }
    Ok(())
  }

  fn version(&self, env: &Environment) -> Result<String, ToolchainError> {
    let vars = env.tool_env()?;
    let verbose: [OsString; 1] = ["-vV".into()];
    let cwd = std::env::temp_dir();

    let mut identity = String::from_utf8_lossy(&run(&env.cargo, &verbose, &vars, &cwd)?.stdout)
      .trim_end()
      .to_string();

    // rustup and distribution installs keep rustc next to cargo.
    let rustc = env.cargo.with_file_name(format!("rustc{}", std::env::consts::EXE_SUFFIX));
    if env.cargo.parent().is_some_and(|p| !p.as_os_str().is_empty()) && rustc.is_file() {
      let output = run(&rustc, &verbose, &vars, &cwd)?;
      identity.push('\n');
      identity.push_str(String::from_utf8_lossy(&output.stdout).trim_end());
    }

    debug!(identity = %identity, "queried toolchain version");
    Ok(identity)
  }
}

/// Run `program` in a cleared environment holding only `vars`. A non-zero exit
/// is an error carrying stderr verbatim.
fn run(program: &Path, args: &[OsString], vars: &BTreeMap<String, OsString>, cwd: &Path) -> Result<Output, ToolchainError> {
  debug!(program = %program.display(), ?args, "spawning process");

  let output = Command::new(program)
    .args(args)
    .current_dir(cwd)
    .env_clear()
    .envs(vars)
    .output()
    .map_err(|source| match source.kind() {
      io::ErrorKind::NotFound => ToolchainError::NotFound {
        program: program.to_path_buf(),
      },
      _ => ToolchainError::Spawn {
        program: program.to_path_buf(),
        source,
      },
    })?;

  if !output.status.success() {
    let program = program
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| program.display().to_string());
    return Err(ToolchainError::Failed {
      program,
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
    });
  }
  Ok(output)
}
