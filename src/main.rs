//! `apiaryd`: the master process.
//!
//! Loads the configuration, starts every subsystem, waits for a termination
//! signal and stops everything in reverse order. Exits with 1 when startup
//! failed or any service failed to stop.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use apiary::{Config, Orchestrator, logging};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "apiaryd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configured one (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,

    /// Log to file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn load(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(file) = &args.log_file {
        config.logging.file = Some(file.clone());
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load(&args)?;
    logging::init(&config.logging).context("failed to initialise logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), config = ?args.config, "apiaryd starting");

    let orchestrator = Orchestrator::new(config).context("invalid subsystem layout")?;
    orchestrator.run_until_signal().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "apiaryd failed");
            eprintln!("apiaryd: {e:#}");
            ExitCode::FAILURE
        }
    }
}
