//! Logger sink of the master process.
//!
//! `RUST_LOG` wins over [`LoggingConfig::level`]. With a file configured, logs are
//! appended there without ANSI colours; otherwise they go to stderr.

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Installs the global `tracing` subscriber.
///
/// Fails when the log file cannot be opened, the level is not a valid filter,
/// or a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> io::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(io::Error::other)?,
    };

    let installed = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                )
                .try_init()
        }
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .try_init(),
    };
    installed.map_err(io::Error::other)
}
