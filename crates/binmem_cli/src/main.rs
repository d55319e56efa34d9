//! BinMem CLI
//!
//! Command-line tools for BinMem log maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display log statistics and manifest state
//! - `verify` - Verify every record in the log
//! - `dump` - Print log entries for debugging
//! - `compact` - Rewrite the log without removed entries
//! - `export` - Write a snapshot of all live entries
//! - `import` - Load a snapshot into the store

mod commands;

use binmem_core::Channel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// BinMem command-line log tools.
#[derive(Parser)]
#[command(name = "binmem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log statistics and manifest state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify every record in the log
    Verify,

    /// Print log entries for debugging
    Dump {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only entries with this exact path
        #[arg(long)]
        path_filter: Option<String>,

        /// Only entries on this channel (input-output, error-log, other)
        #[arg(short, long)]
        channel: Option<Channel>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the log without removed entries
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Write a snapshot of all live entries
    Export {
        /// Snapshot file to write
        target: PathBuf,
    },

    /// Load a snapshot into the store
    Import {
        /// Snapshot file to read
        source: PathBuf,

        /// Discard existing entries instead of merging
        #[arg(long)]
        replace: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump {
            limit,
            path_filter,
            channel,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            let options = commands::dump::DumpOptions {
                limit,
                path: path_filter,
                channel,
            };
            commands::dump::run(&path, &options, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Log path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Export { target } => {
            let path = cli.path.ok_or("Log path required for export")?;
            commands::snapshot::export(&path, &target)?;
        }
        Commands::Import { source, replace } => {
            let path = cli.path.ok_or("Log path required for import")?;
            commands::snapshot::import(&path, &source, replace)?;
        }
        Commands::Version => {
            println!("BinMem CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("BinMem Core v{}", binmem_core::VERSION);
        }
    }

    Ok(())
}
