//! shelfdb CLI
//!
//! Command-line tools for shelfdb database maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display configuration, collections and index statistics
//! - `verify` - Check that indexes and stored objects agree
//! - `rebuild-index` - Rebuild an index from the stored objects
//! - `query` - Run a query and print the matching documents

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// shelfdb command-line database tools.
#[derive(Parser)]
#[command(name = "shelfdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
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
    /// Display configuration, collections and index statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that indexes and stored objects agree
    Verify {
        /// Only check this collection
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Rebuild an index from the stored objects
    RebuildIndex {
        /// Collection name
        collection: String,

        /// Indexed field; all indexes of the collection if omitted
        field: Option<String>,
    },

    /// Run a query and print the matching documents as JSON
    Query {
        /// Collection name
        collection: String,

        /// Query document, e.g. '{"year": {"$gte": 1970}}'
        #[arg(default_value = "{}")]
        query: String,

        /// Sort by field; prefix with '-' for descending
        #[arg(short, long)]
        sort: Vec<String>,

        /// Maximum number of documents to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { collection } => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path, collection.as_deref())?;
        }
        Commands::RebuildIndex { collection, field } => {
            let path = cli.path.ok_or("Database path required for rebuild-index")?;
            commands::rebuild::run(&path, &collection, field.as_deref())?;
        }
        Commands::Query {
            collection,
            query,
            sort,
            limit,
        } => {
            let path = cli.path.ok_or("Database path required for query")?;
            commands::query::run(&path, &collection, &query, &sort, limit)?;
        }
        Commands::Version => {
            println!("shelfdb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("shelfdb Core v{}", shelfdb_core::VERSION);
        }
    }

    Ok(())
}
