mod commands;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use fmcache::config::Config;
use fmcache::logging;
use fmcache::session::{Session, SessionOptions};

#[derive(Parser, Debug)]
#[command(name = "fmcache")]
#[command(about = "Cached access to the facilities-maintenance document store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fmcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_stderr)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let options = SessionOptions {
    ephemeral: args.ephemeral,
    sweep: true,
  };
  let session = Session::open(&config, options).await?;

  let result = commands::run(session.store(), args.command).await;
  session.close().await;

  result
}
