//! LexiSync CLI
//!
//! Command-line driver for the sync engine.
//!
//! # Commands
//!
//! - `sync` - Run a full or delta sync against a JSON fixture backend
//! - `status` - Display the contents of a persisted store
//! - `add-word` - Queue a local vocabulary edit for the next push

mod commands;

use clap::{Parser, Subcommand};
use lexisync_protocol::CollectionId;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LexiSync offline-first sync tools.
#[derive(Parser)]
#[command(name = "lexisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync against a fixture backend
    Sync {
        /// JSON fixture acting as the remote backend
        #[arg(short, long)]
        backend: PathBuf,

        /// Store snapshot file (created if missing)
        #[arg(short, long)]
        store: PathBuf,

        /// Only fetch changes since the last successful sync
        #[arg(short, long)]
        delta: bool,

        /// Collections to sync (default: all)
        #[arg(short, long)]
        collection: Vec<CollectionId>,

        /// Page size for full syncs
        #[arg(short, long)]
        page_size: Option<u32>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display a persisted store
    Status {
        /// Store snapshot file
        #[arg(short, long)]
        store: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Queue a new vocabulary entry
    AddWord {
        /// Store snapshot file (created if missing)
        #[arg(short, long)]
        store: PathBuf,

        /// The word to learn
        #[arg(short, long)]
        word: String,

        /// Its translation
        #[arg(short, long)]
        translation: String,

        /// Part of speech
        #[arg(long)]
        part_of_speech: Option<String>,
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
        Commands::Sync {
            backend,
            store,
            delta,
            collection,
            page_size,
            format,
        } => {
            let options = commands::sync::SyncOptions {
                delta,
                collections: collection,
                page_size,
            };
            commands::sync::run(&backend, &store, &options, &format)?;
        }
        Commands::Status { store, format } => {
            commands::status::run(&store, &format)?;
        }
        Commands::AddWord {
            store,
            word,
            translation,
            part_of_speech,
        } => {
            commands::add_word::run(&store, &word, &translation, part_of_speech)?;
        }
        Commands::Version => {
            println!("LexiSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("LexiSync Engine v{}", lexisync_engine::VERSION);
        }
    }

    Ok(())
}
