//! Rebuild-index command implementation.

use shelfdb_core::Backend;
use std::path::Path;
use tracing::info;

/// Runs the rebuild-index command and commits the result.
pub fn run(
    path: &Path,
    collection: &str,
    field: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_existing(path)?;
    match field {
        Some(field) => db.rebuild_index(collection, field)?,
        None => db.rebuild_indexes(collection)?,
    }
    db.commit()?;

    let info = db.describe(collection)?;
    info!(
        collection = %info.name,
        documents = info.documents,
        indexes = info.indexes.len(),
        "index rebuild committed"
    );
    println!("Rebuilt {} ({} documents)", info.name, info.documents);
    Ok(())
}
