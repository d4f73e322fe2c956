use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fluxo")]
#[command(version = "0.1.0")]
#[command(about = "Order-flow intelligence engine for correlated futures contracts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml + environment overlays)
    #[arg(short, long, default_value = "config")]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run against the bundled simulated feed
    Run {
        /// Milliseconds between simulated events
        #[arg(long, default_value = "25")]
        interval_ms: u64,
        /// Seed for a reproducible session
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Replay a recorded JSON-lines event file
    Replay {
        /// Path to the recording
        file: PathBuf,
        /// Reproduce the recorded event spacing
        #[arg(long)]
        pace: bool,
    },
    /// Load and validate configuration, then exit
    Check,
}
