//! Query command implementation.

use shelfdb_codec::Value;
use shelfdb_core::{Backend, FileBackend, SortOrder};
use std::path::Path;

/// Runs the query command, printing one JSON document per line.
pub fn run(
    path: &Path,
    collection: &str,
    query: &str,
    sort: &[String],
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_existing(path)?;
    for document in select(&db, collection, query, sort, limit)? {
        println!("{document}");
    }
    Ok(())
}

/// Parses `-field` as descending and `field` as ascending.
fn parse_sort(key: &str) -> (&str, SortOrder) {
    match key.strip_prefix('-') {
        Some(field) => (field, SortOrder::Descending),
        None => (key, SortOrder::Ascending),
    }
}

fn select(
    db: &FileBackend,
    collection: &str,
    query: &str,
    sort: &[String],
    limit: Option<usize>,
) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    let query: Value = serde_json::from_str(query)?;
    let mut matches = db.filter(collection, &query)?;
    if !sort.is_empty() {
        let order: Vec<(&str, SortOrder)> = sort.iter().map(|s| parse_sort(s)).collect();
        matches = matches.sort_by(&order)?;
    }
    if let Some(limit) = limit {
        matches = matches.slice(..limit);
    }
    Ok(matches
        .to_vec()?
        .into_iter()
        .map(|document| document.into_attributes())
        .collect())
}
