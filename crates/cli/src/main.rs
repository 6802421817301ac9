//! agekeeper: background filesystem retention engine.

mod logging;

use agekeeper_core::config::EngineConfig;
use anyhow::Context;
use clap::Parser;
use daemon::lifecycle::Daemon;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "agekeeper", about = "Background filesystem retention engine", version)]
struct Args {
  /// Path to the configuration file.
  #[arg(short, long, default_value = "agekeeper.toml")]
  config: PathBuf,

  /// Log to the console instead of a rolling file.
  #[arg(short, long)]
  foreground: bool,

  /// Default log level (error, warn, info, debug, trace).
  #[arg(long, default_value = "info")]
  log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let args = Args::parse();

  let config =
    EngineConfig::load(&args.config).with_context(|| format!("could not load config from {}", args.config.display()))?;

  let _log_guard = logging::init_logging(args.foreground, &args.log_level, &config.state_dir());

  Daemon::new(config).run().await.context("daemon exited with error")?;
  Ok(())
}
