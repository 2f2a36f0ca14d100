//! # shelfdb Core
//!
//! Embedded document database engine for shelfdb.
//!
//! This crate provides:
//! - [`FileBackend`] - documents stored as blobs under a directory, one
//!   collection per subdirectory
//! - Secondary indexes with snapshot-based transactions, persisted or
//!   ephemeral, created on demand for any queried field
//! - A Mongo-style [`query`] language compiled to index lookups
//! - [`QuerySet`] - lazy, sortable, sliceable results with set algebra
//!
//! ## Example
//!
//! ```no_run
//! use shelfdb_codec::Value;
//! use shelfdb_core::{Backend, Document, FileBackend, IndexOptions};
//!
//! let db = FileBackend::open("movies.db").unwrap();
//! db.create_index("movie", "year", IndexOptions::new()).unwrap();
//!
//! let mut movie = Document::new(
//!     "movie",
//!     [("title", Value::from("The Conversation")), ("year", Value::from(1974))],
//! );
//! db.save(&mut movie).unwrap();
//! db.commit().unwrap();
//!
//! let query = serde_json::from_str(r#"{"year": {"$gte": 1970}}"#).unwrap();
//! let seventies = db.filter("movie", &query).unwrap();
//! assert_eq!(seventies.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod document;
mod error;
mod index;
pub mod query;
mod queryset;
mod registry;
mod types;

pub use backend::{Backend, CollectionInfo, FileBackend, IndexInfo, IndexOptions, VerifyReport};
pub use config::{Config, IndexDefinition, StoreKind, CONFIG_FILE, FORMAT_VERSION};
pub use document::Document;
pub use error::{CoreError, CoreResult};
pub use index::{Index, TransactionalIndex, ALL_KEYS_BLOB};
pub use queryset::QuerySet;
pub use registry::{CollectionParams, Registry, DEFAULT_PK_FIELD};
pub use types::{KeySet, SortOrder, StorageKey};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
