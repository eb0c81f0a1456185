//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod cache;
mod fetch;
mod helpers;
mod manifest;
mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, LoadOptions};

#[derive(Parser)]
#[command(name = "legis")]
#[command(about = "Rate-limited, cached access to public legislative data")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file and LEGIS_DATA_DIR)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one collection from a source now, regardless of freshness
    Fetch {
        /// Source name (e.g. congress, lda)
        source: String,
        /// Collection name (e.g. bills, filings)
        collection: String,
        /// Re-fetch and rewrite items already in the manifest
        #[arg(short, long)]
        force: bool,
        /// Stop after examining this many items
        #[arg(short, long)]
        max_results: Option<usize>,
    },

    /// Fetch every collection whose data is stale
    Sync {
        /// Only sync this source
        #[arg(short, long)]
        source: Option<String>,
        /// Fetch even when data is fresh
        #[arg(short, long)]
        force: bool,
    },

    /// Show freshness for each record type and shared cache reachability
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start the read API server
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "3030")]
        port: u16,
    },

    /// Manifest maintenance
    Manifest {
        #[command(subcommand)]
        command: ManifestCommands,
    },

    /// Response cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum ManifestCommands {
    /// Rewrite a manifest from the records actually on disk
    Rebuild {
        /// Record type (e.g. bills)
        record_type: String,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Delete cached responses matching a glob pattern (e.g. 'records:bills:*')
    Clear {
        pattern: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data_dir: cli.data,
    };
    let (settings, _config) = load_settings(options).await?;

    match cli.command {
        Commands::Fetch {
            source,
            collection,
            force,
            max_results,
        } => fetch::cmd_fetch(&settings, &source, &collection, force, max_results).await,
        Commands::Sync { source, force } => {
            fetch::cmd_sync(&settings, source.as_deref(), force).await
        }
        Commands::Status { json } => status::cmd_status(&settings, json).await,
        Commands::Serve { host, port } => serve::cmd_serve(&settings, &host, port).await,
        Commands::Manifest { command } => match command {
            ManifestCommands::Rebuild { record_type } => {
                manifest::cmd_manifest_rebuild(&settings, &record_type)
            }
        },
        Commands::Cache { command } => match command {
            CacheCommands::Clear { pattern } => cache::cmd_cache_clear(&settings, &pattern).await,
        },
    }
}
