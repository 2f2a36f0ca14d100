//! Inspect command implementation.

use serde::Serialize;
use shelfdb_core::{CollectionInfo, FileBackend};
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Serializer name.
    pub serializer: String,
    /// Object store variant.
    pub store: String,
    /// Format version as `major.minor`.
    pub format_version: String,
    /// Per-collection statistics.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Primary-key field.
    pub pk_field: String,
    /// Number of documents.
    pub documents: usize,
    /// Index statistics.
    pub indexes: Vec<IndexStats>,
}

/// Statistics for a single index.
#[derive(Debug, Serialize)]
pub struct IndexStats {
    /// Indexed field.
    pub field: String,
    /// Whether duplicates are rejected.
    pub unique: bool,
    /// Whether this is the primary-key index.
    pub primary: bool,
    /// Number of distinct values.
    pub values: usize,
    /// Number of indexed documents.
    pub documents: usize,
}

impl From<CollectionInfo> for CollectionStats {
    fn from(info: CollectionInfo) -> Self {
        Self {
            name: info.name,
            pk_field: info.pk_field,
            documents: info.documents,
            indexes: info
                .indexes
                .into_iter()
                .map(|i| IndexStats {
                    field: i.field,
                    unique: i.unique,
                    primary: i.primary,
                    values: i.values,
                    documents: i.documents,
                })
                .collect(),
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_existing(path)?;
    let result = inspect(&db)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(db: &FileBackend) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let config = db.config();
    let mut collections = Vec::new();
    for name in db.collection_names() {
        collections.push(CollectionStats::from(db.describe(&name)?));
    }
    Ok(InspectResult {
        path: db.path().display().to_string(),
        serializer: serde_json::to_value(config.serializer)?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        store: serde_json::to_value(config.store)?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        format_version: format!("{}.{}", config.format_version.0, config.format_version.1),
        collections,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Database: {}", result.path);
    println!("Format:   v{}", result.format_version);
    println!("Serializer: {}", result.serializer);
    println!("Store:      {}", result.store);
    println!();

    if result.collections.is_empty() {
        println!("No collections");
        return;
    }

    for collection in &result.collections {
        println!(
            "Collection {} ({} documents, pk: {})",
            collection.name, collection.documents, collection.pk_field
        );
        for index in &collection.indexes {
            let mut flags = Vec::new();
            if index.primary {
                flags.push("primary");
            }
            if index.unique {
                flags.push("unique");
            }
            println!(
                "  {:<24} {:>8} values {:>8} documents {}",
                index.field,
                index.values,
                index.documents,
                flags.join(",")
            );
        }
    }
}
