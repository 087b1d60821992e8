use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use cmd::{cmd_checksum, cmd_serve, cmd_status, cmd_unlock};
use output::OutputFormat;

/// mlabc - build orchestration for mobile application sources
#[derive(Parser)]
#[command(name = "mlabc")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the config file (default: $MLABC_CONFIG, then the user config dir)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the HTTP service
  Serve {
    /// Address to listen on, overriding the config
    #[arg(short, long)]
    listen: Option<String>,
  },

  /// Print the source checksum of a directory
  Checksum {
    /// Directory to checksum
    dir: PathBuf,

    /// Additional basenames to exclude
    #[arg(short, long)]
    exclude: Vec<String>,
  },

  /// Show build status of applications
  Status {
    /// Only this application id
    app: Option<String>,

    /// Only this version
    version: Option<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Remove a build lock left behind by a crashed build
  Unlock {
    app: String,
    version: String,
    platform: String,

    /// Only remove the lock if it is older than this (e.g. "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    older_than: Option<Duration>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();

  let config = cli.config.as_deref();
  match cli.command {
    Commands::Serve { listen } => cmd_serve(config, listen),
    Commands::Checksum { dir, exclude } => cmd_checksum(config, &dir, exclude),
    Commands::Status { app, version, output } => cmd_status(config, app, version, output),
    Commands::Unlock {
      app,
      version,
      platform,
      older_than,
    } => cmd_unlock(config, &app, &version, &platform, older_than),
  }
}
