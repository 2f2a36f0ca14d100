//! Test fixtures and backend helpers.
//!
//! Provides backends in temporary directories and common test data.

use shelfdb_core::{Config, FileBackend};
use shelfdb_storage::{BlobStore, FileBlobStore};
use std::path::Path;
use tempfile::TempDir;

/// A backend in a temporary directory, removed on drop.
pub struct TestBackend {
    /// The backend instance.
    pub db: FileBackend,
    config: Config,
    dir: TempDir,
}

impl TestBackend {
    /// Opens a backend with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Opens a backend with `config`.
    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let db = FileBackend::open_with_config(dir.path(), config.clone())
            .expect("Failed to open backend");
        Self { db, config, dir }
    }

    /// Drops the backend without committing and opens it again.
    pub fn reopen(self) -> Self {
        let Self { db, config, dir } = self;
        drop(db);
        let db = FileBackend::open_with_config(dir.path(), config.clone())
            .expect("Failed to reopen backend");
        Self { db, config, dir }
    }

    /// Returns the database directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Deletes a stored object behind the indexes' back.
    pub fn remove_object(&self, collection: &str, storage_key: &str) {
        let mut objects = FileBlobStore::open(&self.dir.path().join(collection).join("objects"))
            .expect("Failed to open object store");
        objects
            .delete(storage_key)
            .expect("Failed to delete object");
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestBackend {
    type Target = FileBackend;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a backend in a temporary directory.
///
/// # Example
///
/// ```rust
/// use shelfdb_testkit::with_temp_backend;
///
/// with_temp_backend(|db| {
///     assert!(db.in_transaction());
/// });
/// ```
pub fn with_temp_backend<F, R>(f: F) -> R
where
    F: FnOnce(&FileBackend) -> R,
{
    let backend = TestBackend::new();
    f(&backend.db)
}

/// Test scenario helpers.
pub mod scenarios {
    use shelfdb_codec::Value;
    use shelfdb_core::{Backend, CollectionParams, Document, FileBackend};

    /// Registers the `Actor` type and saves Marlon Brando and Al Pacino.
    pub fn seed_actors(db: &FileBackend) -> Vec<Document> {
        db.register("Actor", CollectionParams::new("actor"))
            .expect("Failed to register Actor");
        [("Marlon Brando", 1924), ("Al Pacino", 1940)]
            .into_iter()
            .map(|(name, year)| {
                let mut actor = Document::new(
                    "Actor",
                    [("name", Value::from(name)), ("year", Value::from(year))],
                );
                db.save(&mut actor).expect("Failed to save actor");
                actor
            })
            .collect()
    }

    /// Saves a handful of movies with titles, years and tags.
    pub fn seed_movies(db: &FileBackend) -> Vec<Document> {
        [
            ("The Godfather", 1972, vec!["crime", "classic"]),
            ("The Conversation", 1974, vec!["thriller"]),
            ("Heat", 1995, vec!["crime", "thriller"]),
            ("Solaris", 1972, vec![]),
        ]
        .into_iter()
        .map(|(title, year, tags)| {
            let mut movie = Document::new(
                "movie",
                [
                    ("title", Value::from(title)),
                    ("year", Value::from(year)),
                    ("tags", Value::from(tags)),
                ],
            );
            db.save(&mut movie).expect("Failed to save movie");
            movie
        })
        .collect()
    }

    /// Returns the values of `field` in `documents`, in order.
    pub fn field_values(documents: &[Document], field: &str) -> Vec<Value> {
        documents
            .iter()
            .filter_map(|d| d.get(field).cloned())
            .collect()
    }
}
