//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No blob is stored under the key.
    #[error("blob not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The key cannot be used as a blob name.
    #[error("invalid blob key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Attempted to read beyond the end of a pack file.
    #[error("read beyond end of pack: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current pack size.
        size: u64,
    },

    /// On-disk metadata is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Commit or rollback without an open transaction.
    #[error("no transaction in progress")]
    NotInTransaction,
}

impl StorageError {
    /// Creates a not-found error for a key.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Returns true if this error reports a missing blob.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
