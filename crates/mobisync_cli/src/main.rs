//! mobisync CLI
//!
//! Command-line tools for exercising the mobisync engine.
//!
//! # Commands
//!
//! - `simulate` - Run a seeded multi-device sync simulation and print a report
//! - `version` - Show version information

mod commands;
mod config;
mod error;

use clap::{Parser, Subcommand};
use commands::simulate::{self, SimulateArgs};
use config::FileConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// mobisync command-line tools.
#[derive(Parser)]
#[command(name = "mobisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON engine configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a seeded multi-device sync simulation
    Simulate {
        /// Number of devices
        #[arg(short, long, default_value = "5")]
        devices: usize,

        /// Number of sync requests
        #[arg(short, long, default_value = "100")]
        operations: usize,

        /// Probability that a transfer fails (0-1)
        #[arg(long, default_value = "0.2")]
        failure_rate: f64,

        /// Probability that a conflict-prone transfer conflicts (0-1)
        #[arg(long, default_value = "0.05")]
        conflict_rate: f64,

        /// Probability that a device flips connectivity before a request (0-1)
        #[arg(long, default_value = "0.1")]
        offline_rate: f64,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            devices,
            operations,
            failure_rate,
            conflict_rate,
            offline_rate,
            seed,
            format,
        } => {
            let mut config = simulate::default_config();
            if let Some(path) = &cli.config {
                config = FileConfig::load(path)?.apply(config);
            }
            let args = SimulateArgs {
                devices,
                operations,
                failure_rate,
                conflict_rate,
                offline_rate,
                seed,
            };
            simulate::run(&args, config, &format).await?;
        }
        Commands::Version => {
            println!("mobisync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("mobisync engine v{}", mobisync_engine::VERSION);
        }
    }

    Ok(())
}
