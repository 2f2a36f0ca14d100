//! Error types for shelfdb core.

use shelfdb_codec::Value;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in shelfdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Blob store error.
    #[error("storage error: {0}")]
    Storage(#[from] shelfdb_storage::StorageError),

    /// Serialization error.
    #[error("codec error: {0}")]
    Codec(#[from] shelfdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configuration file could not be read or written.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// No document matched a lookup that requires one.
    #[error("document not found in {collection}: {detail}")]
    DocumentNotFound {
        /// Collection searched.
        collection: String,
        /// What was looked up.
        detail: String,
    },

    /// The collection has never been written to.
    #[error("no collection named {collection}")]
    CollectionNotFound {
        /// Collection looked up.
        collection: String,
    },

    /// A lookup that requires exactly one document matched several.
    #[error("{count} documents in {collection} match a query expecting one")]
    MultipleDocuments {
        /// Collection searched.
        collection: String,
        /// Number of matches.
        count: usize,
    },

    /// Commit or rollback without an open transaction.
    #[error("no transaction in progress")]
    NotInTransaction,

    /// An index posting points at a storage key with no blob.
    ///
    /// Recover with an explicit index rebuild.
    #[error("index corruption in {collection}: storage key {storage_key} has no blob")]
    IndexCorruption {
        /// Affected collection.
        collection: String,
        /// Storage key named by the posting.
        storage_key: String,
    },

    /// The query cannot be compiled.
    #[error("malformed query: {message}")]
    MalformedQuery {
        /// Description of the problem.
        message: String,
    },

    /// A unique index holds one value for several documents.
    #[error("unique index {collection}.{field} violated by value {value}")]
    UniqueViolation {
        /// Affected collection.
        collection: String,
        /// Indexed field.
        field: String,
        /// The duplicated value.
        value: Value,
    },

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a document not found error.
    pub fn document_not_found(collection: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::DocumentNotFound {
            collection: collection.into(),
            detail: detail.into(),
        }
    }

    /// Creates a collection not found error.
    pub fn collection_not_found(collection: impl Into<String>) -> Self {
        Self::CollectionNotFound {
            collection: collection.into(),
        }
    }

    /// Creates an index corruption error.
    pub fn index_corruption(collection: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self::IndexCorruption {
            collection: collection.into(),
            storage_key: storage_key.into(),
        }
    }

    /// Creates a malformed query error.
    pub fn malformed_query(message: impl Into<String>) -> Self {
        Self::MalformedQuery {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a missing document.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DocumentNotFound { .. } | Self::CollectionNotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }
}
