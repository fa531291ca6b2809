//! Command-line arguments for the daemon

use clap::Parser;
use std::path::PathBuf;

/// Scanorama - continuous network discovery and scanning daemon
#[derive(Debug, Parser)]
#[command(name = "scanorama-daemon", version, about)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Seconds to wait for running jobs on shutdown (overrides the config file)
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Default tracing filter directive for the chosen verbosity;
    /// `RUST_LOG` still wins when set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
