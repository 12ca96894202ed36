mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use plugpack_lib::PipelineError;
use plugpack_lib::profile::Profile;

use cmd::{cmd_build, cmd_closure, cmd_deps, cmd_gc, cmd_info};
use output::{OutputFormat, print_error};

/// plugpack - reproducible builds of Rust audio plugins into host bundles
#[derive(Parser)]
#[command(name = "plugpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short = 'O', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
  /// Workspace root containing Cargo.toml and Cargo.lock
  #[arg(short, long, default_value = ".")]
  pub workspace: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
  #[command(flatten)]
  pub workspace: WorkspaceArgs,

  /// Workspace member to package
  #[arg(short, long)]
  pub package: Option<String>,

  /// Output root (bundle lands in <DIR>/lib/<kind>/)
  #[arg(short = 'o', long = "out", value_name = "DIR")]
  pub out: Option<PathBuf>,

  /// Host plugin kind, used as the directory under lib/
  #[arg(long)]
  pub kind: Option<String>,

  /// Host plugin file extension
  #[arg(long)]
  pub extension: Option<String>,

  /// Cargo profile to build with
  #[arg(long)]
  pub profile: Option<Profile>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a workspace member and package it as a plugin bundle
  Build(BuildArgs),

  /// Build or reuse the dependency artifact set only
  Deps {
    #[command(flatten)]
    workspace: WorkspaceArgs,

    /// Cargo profile to build with
    #[arg(long)]
    profile: Option<Profile>,
  },

  /// List the files in the source closure
  Closure {
    #[command(flatten)]
    workspace: WorkspaceArgs,
  },

  /// Show platform, store and resolved configuration
  Info {
    #[command(flatten)]
    workspace: WorkspaceArgs,
  },

  /// Remove incomplete artifact sets and stale scratch directories
  Gc {
    /// Show what would be removed without deleting
    #[arg(long)]
    dry_run: bool,

    /// Also remove complete dependency artifact sets
    #[arg(long)]
    all: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
  let filter = EnvFilter::builder()
    .with_default_directive(default_level.into())
    .from_env_lossy();
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Build(args) => cmd_build(&args, cli.output),
    Commands::Deps { workspace, profile } => cmd_deps(&workspace.workspace, profile, cli.output),
    Commands::Closure { workspace } => cmd_closure(&workspace.workspace, cli.output),
    Commands::Info { workspace } => cmd_info(&workspace.workspace, cli.output),
    Commands::Gc { dry_run, all } => cmd_gc(dry_run, all, cli.output),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      match err.downcast_ref::<PipelineError>() {
        Some(pipeline) => print_error(&format!("error in {} stage: {}", pipeline.stage(), pipeline)),
        None => print_error(&format!("{:#}", err)),
      }
      ExitCode::FAILURE
    }
  }
}
