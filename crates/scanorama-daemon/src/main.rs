//! Scanorama daemon binary
//!
//! Loads configuration, initialises logging, and hands control to the
//! supervisor until a termination signal arrives.

mod args;

use anyhow::{Context, Result};
use args::Args;
use clap::Parser;
use scanorama_core::DaemonConfig;
use scanorama_engine::daemon::Daemon;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("scanorama-daemon: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => DaemonConfig::default(),
    };

    if let Some(database) = &args.database {
        config.database.path = database.clone();
    }
    if let Some(timeout) = args.shutdown_timeout {
        config.scheduler.shutdown_timeout_secs = timeout;
    }
    config.validate().context("invalid configuration")?;

    let daemon = Daemon::build(&config)
        .await
        .context("failed to initialise daemon")?;

    daemon
        .run_until_shutdown()
        .await
        .context("daemon terminated abnormally")?;

    Ok(())
}
