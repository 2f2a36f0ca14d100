//! In-memory blob store for testing.

use crate::blob::{validate_key, BlobStore};
use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;

/// A blob store holding everything in memory.
///
/// Suitable for unit tests and scratch data that never needs to
/// survive the process.
///
/// # Example
///
/// ```rust
/// use shelfdb_storage::{BlobStore, InMemoryBlobStore};
///
/// let mut store = InMemoryBlobStore::new();
/// store.store("k", b"test data").unwrap();
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn store(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.blobs
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        self.blobs.remove(key);
        Ok(())
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.blobs.contains_key(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.blobs.keys().cloned().collect())
    }
}
