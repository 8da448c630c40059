//! sqlkv CLI
//!
//! Command-line tools for sqlkv store management.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and metadata
//! - `verify` - Run the engine integrity check
//! - `dump` - Print entries, optionally under a prefix
//! - `export` - Write an encrypted copy of the store
//! - `import` - Replace the store's contents from a file
//! - `rekey` - Change the store password

mod commands;

use clap::{Parser, Subcommand};
use commands::StoreArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// sqlkv command-line store tools.
#[derive(Parser)]
#[command(name = "sqlkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory holding the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Store ID (the store directory name)
    #[arg(global = true, short, long)]
    store: Option<String>,

    /// Store password (omit for plaintext stores)
    #[arg(global = true, long)]
    password: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run the engine integrity check
    Verify,

    /// Print entries
    Dump {
        /// Only entries whose key starts with this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a copy of the store to a new file
    Export {
        /// Target file; must not exist
        #[arg(short, long)]
        output: PathBuf,

        /// Password for the copy (plaintext if omitted)
        #[arg(long)]
        target_password: Option<String>,
    },

    /// Replace the store's contents with a database file
    Import {
        /// Source database file
        #[arg(short, long)]
        input: PathBuf,

        /// Password of the source file (plaintext if omitted)
        #[arg(long)]
        source_password: Option<String>,
    },

    /// Re-encrypt the store with a new password
    Rekey {
        /// The new password; empty decrypts the store
        #[arg(long)]
        new_password: String,
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

    let store = || -> Result<StoreArgs, Box<dyn std::error::Error>> {
        StoreArgs::new(
            cli.path.clone().ok_or("Data directory (--path) required")?,
            cli.store.clone().ok_or("Store ID (--store) required")?,
            cli.password.as_deref(),
        )
    };

    match &cli.command {
        Commands::Inspect { format } => {
            commands::inspect::run(&store()?, format)?;
        }
        Commands::Verify => {
            commands::verify::run(&store()?)?;
        }
        Commands::Dump {
            prefix,
            limit,
            format,
        } => {
            commands::dump::run(&store()?, prefix.as_bytes(), *limit, format)?;
        }
        Commands::Export {
            output,
            target_password,
        } => {
            commands::transfer::export(&store()?, output, target_password.as_deref())?;
        }
        Commands::Import {
            input,
            source_password,
        } => {
            commands::transfer::import(&store()?, input, source_password.as_deref())?;
        }
        Commands::Rekey { new_password } => {
            commands::rekey::run(&store()?, new_password)?;
        }
        Commands::Version => {
            println!("sqlkv CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("sqlkv Core v{}", sqlkv_core::VERSION);
        }
    }

    Ok(())
}
