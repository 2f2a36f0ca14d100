//! Blob store trait definition.

use crate::error::{StorageError, StorageResult};

/// Durable key to bytes storage, one logical object per key.
///
/// # Invariants
///
/// - `get` returns exactly the bytes last passed to `store` for the key
/// - `get` on an absent key fails with [`StorageError::NotFound`]
/// - `delete` of an absent key is a no-op
/// - keys are single path components (see [`validate_key`])
///
/// # Implementors
///
/// - [`super::FileBlobStore`]
/// - [`super::CompactingBlobStore`]
/// - [`super::InMemoryBlobStore`]
/// - [`super::TransactionalStore`]
pub trait BlobStore: Send + Sync {
    /// Stores `data` under `key`, replacing any previous blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn store(&mut self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Reads the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no blob exists.
    fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Removes the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn delete(&mut self, key: &str) -> StorageResult<()>;

    /// Checks whether a blob exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn has(&self, key: &str) -> StorageResult<bool>;

    /// Lists every stored key, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn store(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        (**self).store(key, data)
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        (**self).get(key)
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        (**self).has(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }
}

/// Checks that `key` can be used as a blob name.
///
/// Keys become file names, so they must be non-empty single path
/// components. Leading dots are reserved for temporary files.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the problem.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.starts_with('.') {
        Some("key starts with '.'")
    } else if key.contains(['/', '\\', '\0']) {
        Some("key contains a path separator or NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
