// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "scanner")]
#[command(about = "Scan barcodes with a camera")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in terminal mode (camera preview and scan results in the terminal)
    Terminal,

    /// List available cameras
    List {
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan without a UI, printing one line per decoded barcode
    Scan {
        /// Camera id to use (from 'scanner list'); defaults to the last used camera
        #[arg(short, long)]
        device: Option<String>,

        /// Exit after this many results
        #[arg(short, long)]
        count: Option<usize>,

        /// Duplicate-suppression window in milliseconds
        #[arg(long)]
        cooldown_ms: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Terminal);

    // The terminal UI owns stdout, so its logs go to a file
    init_logging(matches!(command, Commands::Terminal));

    match command {
        Commands::Terminal => scanner::terminal::run(),
        Commands::List { json } => cli::list_cameras(json),
        Commands::Scan {
            device,
            count,
            cooldown_ms,
        } => cli::scan(device, count, cooldown_ms),
    }
}

/// Initialize logging
///
/// Set RUST_LOG environment variable to control log level.
/// Examples: RUST_LOG=debug, RUST_LOG=scanner=debug, RUST_LOG=info
fn init_logging(to_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if to_file {
        // Without a log file the terminal UI runs without logging
        if let Some(file) = scanner::terminal::open_log_file() {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}
