//! sidx CLI
//!
//! Command-line tools for sidx index directories.
//!
//! # Commands
//!
//! - `inspect` - Display the schema, registered indexes and snapshot metadata
//! - `verify` - Verify snapshot checksums, ordering and uniqueness
//! - `rebuild` - Rebuild indexes from the stored records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// sidx command-line index tools.
#[derive(Parser)]
#[command(name = "sidx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the index directory
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
    /// Display schema, indexes and snapshot metadata
    Inspect {
        /// Show class and property declarations
        #[arg(short, long)]
        schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify index snapshots
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rebuild indexes from the stored records
    Rebuild {
        /// Index to rebuild; all indexes if omitted
        #[arg(short, long)]
        index: Option<String>,
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
        Commands::Inspect { schema, format } => {
            let path = cli.path.ok_or("Index directory path required for inspect")?;
            commands::inspect::run(&path, schema, &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Index directory path required for verify")?;
            commands::verify::run(&path, &format)?;
        }
        Commands::Rebuild { index } => {
            let path = cli.path.ok_or("Index directory path required for rebuild")?;
            commands::rebuild::run(&path, index.as_deref())?;
        }
        Commands::Version => {
            println!("sidx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("sidx Core v{}", sidx_core::VERSION);
        }
    }

    Ok(())
}
