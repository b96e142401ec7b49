use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;
mod prompts;

use output::OutputFormat;

/// hover - deploy serverless application stages
#[derive(Parser)]
#[command(name = "hover")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Settings file (default: .hover/settings.toml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile a stage manifest into a stack template
  Compile {
    /// Build manifest of the stage
    manifest: PathBuf,

    /// Packaged image locator, tagged with the build id
    #[arg(long)]
    image: String,

    /// Write the template here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Deploy a build of a stage
  Deploy {
    /// Build manifest of the stage
    manifest: PathBuf,

    /// Packaged image locator, tagged with the build id
    #[arg(long)]
    image: String,

    /// Directory of static assets to publish
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Give up waiting for the stack after this long (e.g. "15m")
    #[arg(long, value_parser = humantime::parse_duration)]
    max_wait: Option<Duration>,
  },

  /// Run a command on the live command function of a stage
  Run {
    /// Command to run
    command: String,

    /// Stage manifest
    #[arg(short, long)]
    stage: PathBuf,
  },

  /// Delete expired build artifacts and assets
  Purge {
    /// Stage manifest
    manifest: PathBuf,

    /// Show what would be deleted without deleting
    #[arg(long)]
    dry_run: bool,
  },

  /// Delete a stage with all its resources
  Teardown {
    /// Stage manifest
    manifest: PathBuf,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
  },
}

fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn run(cli: Cli) -> Result<()> {
  let config = cli.config.as_deref();
  match cli.command {
    Commands::Compile { manifest, image, out } => cmd::cmd_compile(&manifest, &image, out.as_deref()),
    Commands::Deploy {
      manifest,
      image,
      assets,
      max_wait,
    } => cmd::cmd_deploy(config, &manifest, &image, assets, max_wait, cli.output),
    Commands::Run { command, stage } => cmd::cmd_run(config, &stage, &command, cli.output),
    Commands::Purge { manifest, dry_run } => cmd::cmd_purge(config, &manifest, dry_run, cli.output),
    Commands::Teardown { manifest, force } => cmd::cmd_teardown(config, &manifest, force, cli.output),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      output::error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
