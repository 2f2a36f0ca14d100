//! # shelfdb Storage
//!
//! Blob stores and transactional staging for shelfdb.
//!
//! A blob store maps opaque string keys to byte blobs. Stores do not
//! interpret the bytes they hold; serialization belongs to the codec
//! crate and document semantics belong to the core crate.
//!
//! ## Available Stores
//!
//! - [`FileBlobStore`] - one file per key under a directory
//! - [`CompactingBlobStore`] - many small blobs packed into a bounded
//!   number of append-only pack files
//! - [`InMemoryBlobStore`] - for tests and scratch data
//! - [`TransactionalStore`] - wraps any store with an in-memory
//!   update/delete delta providing begin/commit/rollback
//!
//! ## Example
//!
//! ```rust
//! use shelfdb_storage::{BlobStore, InMemoryBlobStore, TransactionalStore};
//!
//! let mut store = TransactionalStore::new(InMemoryBlobStore::new());
//! store.begin().unwrap();
//! store.store("k1", b"hello").unwrap();
//! assert_eq!(store.get("k1").unwrap(), b"hello");
//! store.rollback().unwrap();
//! assert!(!store.has("k1").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod compacting;
mod error;
mod file;
mod memory;
mod pack;
mod transactional;

pub use blob::{validate_key, BlobStore};
pub use compacting::{CompactingBlobStore, DEFAULT_FAN_OUT};
pub use error::{StorageError, StorageResult};
pub use file::FileBlobStore;
pub use memory::InMemoryBlobStore;
pub use pack::PackFile;
pub use transactional::TransactionalStore;
