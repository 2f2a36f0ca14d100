//! Storage backends.
//!
//! [`Backend`] is the interface documents are stored through;
//! [`FileBackend`] is the directory-backed implementation.

mod collection;
mod file;
mod sort;

pub use file::{CollectionInfo, FileBackend, IndexInfo, VerifyReport};

use crate::document::Document;
use crate::error::CoreResult;
use crate::registry::CollectionParams;
use shelfdb_codec::Value;

/// Options for [`Backend::create_index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Reject duplicate values at commit.
    pub unique: bool,
    /// Keep the index in memory only.
    pub ephemeral: bool,
}

impl IndexOptions {
    /// Persistent, non-unique.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            unique: false,
            ephemeral: false,
        }
    }

    /// Sets whether duplicate values are rejected.
    #[must_use]
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets whether the index is kept in memory only.
    #[must_use]
    pub const fn ephemeral(mut self, value: bool) -> Self {
        self.ephemeral = value;
        self
    }
}

/// A document store with secondary indexes and transactions.
///
/// A backend is always inside a transaction: opening it begins one, and
/// `commit` and `rollback` each begin the next.
pub trait Backend {
    /// Lazy result of [`Backend::filter`].
    type QuerySet<'a>
    where
        Self: 'a;

    /// Registers a document type name.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection already exists with a different
    /// primary-key field.
    fn register(&self, type_name: &str, params: CollectionParams) -> CoreResult<()>;

    /// Stores a document, assigning a primary key if it has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized or written.
    fn save(&self, document: &mut Document) -> CoreResult<()>;

    /// Returns the single document matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`](crate::CoreError::DocumentNotFound)
    /// or [`CoreError::MultipleDocuments`](crate::CoreError::MultipleDocuments)
    /// unless exactly one document matches.
    fn get(&self, collection: &str, query: &Value) -> CoreResult<Document>;

    /// Returns the documents matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is malformed.
    fn filter<'a>(&'a self, collection: &str, query: &Value) -> CoreResult<Self::QuerySet<'a>>;

    /// Deletes a document by its primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if no stored document has the document's primary key.
    fn delete(&self, document: &Document) -> CoreResult<()>;

    /// Declares an index on a dotted field path.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be populated.
    fn create_index(&self, collection: &str, field: &str, options: IndexOptions)
        -> CoreResult<()>;

    /// Commits any open transaction and begins a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the implicit commit fails.
    fn begin(&self) -> CoreResult<()>;

    /// Makes the open transaction durable and begins a new one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniqueViolation`](crate::CoreError::UniqueViolation)
    /// without writing anything if a unique index holds a duplicate.
    fn commit(&self) -> CoreResult<()>;

    /// Discards the open transaction and begins a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if an index cannot be rebuilt.
    fn rollback(&self) -> CoreResult<()>;

    /// Encodes attributes with the configured serializer.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn serialize(&self, value: &Value) -> CoreResult<Vec<u8>>;

    /// Decodes attributes with the configured serializer.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be decoded.
    fn deserialize(&self, bytes: &[u8]) -> CoreResult<Value>;
}
