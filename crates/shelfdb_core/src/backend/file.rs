//! The directory-backed [`Backend`].

use crate::backend::collection::Collection;
use crate::backend::{sort, Backend, IndexOptions};
use crate::config::Config;
use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use crate::query::Expr;
use crate::queryset::QuerySet;
use crate::registry::{CollectionParams, Registry};
use crate::types::{KeySet, SortOrder, StorageKey};
use parking_lot::RwLock;
use shelfdb_codec::{Serializer, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A document store rooted at a directory.
///
/// Layout:
///
/// ```text
/// <path>/config.json
/// <path>/<collection>/objects/<storage key>
/// <path>/<collection>/indexes/<index id>/all_keys
/// ```
///
/// Every operation takes `&self`; an internal lock serializes writers.
/// The backend is always inside a transaction. Nothing reaches disk until
/// [`Backend::commit`], unless the configuration enables autocommit.
///
/// # Example
///
/// ```no_run
/// use shelfdb_core::{Backend, Document, FileBackend};
/// use shelfdb_codec::Value;
///
/// let db = FileBackend::open("movies.db").unwrap();
/// let mut movie = Document::new("movie", [("title", Value::from("Chinatown"))]);
/// db.save(&mut movie).unwrap();
/// db.commit().unwrap();
/// ```
pub struct FileBackend {
    path: PathBuf,
    serializer: Box<dyn Serializer>,
    state: RwLock<State>,
}

struct State {
    config: Config,
    registry: Registry,
    collections: BTreeMap<String, Collection>,
    in_transaction: bool,
    depth: usize,
}

impl State {
    fn params(&self, name: &str) -> CollectionParams {
        self.registry
            .resolve(name)
            .cloned()
            .unwrap_or_else(|| CollectionParams::new(name))
    }

    fn open_collection(
        &mut self,
        root: &Path,
        serializer: &dyn Serializer,
        params: &CollectionParams,
    ) -> CoreResult<&mut Collection> {
        if !self.collections.contains_key(&params.collection) {
            let (mut collection, changed) = Collection::open(
                root,
                &params.collection,
                &params.pk_field,
                &mut self.config,
                serializer,
            )?;
            if changed {
                self.config.save(root)?;
            }
            if self.in_transaction {
                collection.begin()?;
            }
            debug!(collection = %params.collection, "opened collection");
            self.collections
                .insert(params.collection.clone(), collection);
        }
        self.collections
            .get_mut(&params.collection)
            .ok_or_else(|| CoreError::invalid_operation("collection vanished while opening"))
    }

    fn collection_mut(
        &mut self,
        root: &Path,
        serializer: &dyn Serializer,
        name: &str,
    ) -> CoreResult<&mut Collection> {
        let params = self.params(name);
        self.open_collection(root, serializer, &params)
    }

    fn begin_all(&mut self) -> CoreResult<()> {
        for collection in self.collections.values_mut() {
            collection.begin()?;
        }
        self.in_transaction = true;
        Ok(())
    }

    fn begin_nested(&mut self) -> CoreResult<()> {
        for collection in self.collections.values_mut() {
            collection.begin_nested()?;
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self, serializer: &dyn Serializer) -> CoreResult<()> {
        if !self.in_transaction {
            return Err(CoreError::NotInTransaction);
        }
        for collection in self.collections.values() {
            collection.check_unique()?;
        }
        for collection in self.collections.values_mut() {
            collection.commit(serializer)?;
        }
        debug!(collections = self.collections.len(), "committed transaction");
        self.begin_all()
    }

    fn rollback(&mut self, serializer: &dyn Serializer) -> CoreResult<()> {
        if !self.in_transaction {
            return Err(CoreError::NotInTransaction);
        }
        for collection in self.collections.values_mut() {
            collection.rollback(serializer)?;
        }
        self.in_transaction = false;
        debug!(collections = self.collections.len(), "rolled back transaction");
        self.begin_all()
    }
}

/// Summary of one index, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Indexed field path.
    pub field: String,
    /// Whether duplicates are rejected.
    pub unique: bool,
    /// Whether this is the primary-key index.
    pub primary: bool,
    /// Whether the index lives in memory only.
    pub ephemeral: bool,
    /// Number of distinct values.
    pub values: usize,
    /// Number of documents with postings.
    pub documents: usize,
}

/// Summary of one collection, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Primary-key field.
    pub pk_field: String,
    /// Number of documents, per the primary-key index.
    pub documents: usize,
    /// Indexes, ordered by field.
    pub indexes: Vec<IndexInfo>,
}

/// Result of [`FileBackend::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Collection checked.
    pub collection: String,
    /// Blobs in the object store.
    pub documents: usize,
    /// `(field, storage key)` postings with no blob behind them.
    pub dangling: Vec<(String, StorageKey)>,
    /// Blobs the primary-key index doesn't know about.
    pub unindexed: Vec<StorageKey>,
}

impl VerifyReport {
    /// Returns true if indexes and objects agree.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.dangling.is_empty() && self.unindexed.is_empty()
    }
}

impl FileBackend {
    /// Opens or creates a database with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or its configuration cannot be
    /// read or created.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a database.
    ///
    /// A stored `config.json` takes precedence over `config` unless
    /// `overwrite_config` is set; declared indexes always come from the
    /// stored file. Autocommit is a per-session setting and is always
    /// taken from `config`. Indexes whose postings are missing on disk are
    /// rebuilt from the objects. A transaction is begun before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the database is missing and
    /// `create_if_missing` is off, or the stored format is incompatible.
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if !config.create_if_missing {
                return Err(CoreError::invalid_format(format!(
                    "no database at {}",
                    path.display()
                )));
            }
            fs::create_dir_all(&path)?;
        }

        let config = match Config::load(&path)? {
            Some(stored) if config.overwrite_config => {
                let merged = Config {
                    indexes: stored.indexes,
                    ..config
                };
                merged.save(&path)?;
                merged
            }
            Some(mut stored) => {
                stored.autocommit = config.autocommit;
                stored
            }
            None => {
                config.save(&path)?;
                config
            }
        };

        let serializer = config.serializer.build();
        let names: Vec<String> = config.indexes.keys().cloned().collect();
        let mut state = State {
            config,
            registry: Registry::new(),
            collections: BTreeMap::new(),
            in_transaction: false,
            depth: 0,
        };
        for name in names {
            state.open_collection(&path, serializer.as_ref(), &CollectionParams::new(name))?;
        }
        state.begin_all()?;

        info!(
            path = %path.display(),
            serializer = serializer.name(),
            collections = state.collections.len(),
            "opened database"
        );
        Ok(Self {
            path,
            serializer,
            state: RwLock::new(state),
        })
    }

    /// Returns the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        self.state.read().config.clone()
    }

    /// Returns true while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.read().in_transaction
    }

    /// Returns the names of the open collections.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.state.read().collections.keys().cloned().collect()
    }

    /// Runs `f` against an existing collection.
    ///
    /// Returns `None` without touching the disk if the collection has never
    /// been created.
    fn read<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Collection) -> CoreResult<T>,
    ) -> CoreResult<Option<T>> {
        let state = self.state.read();
        let params = state.params(name);
        state.collections.get(&params.collection).map(f).transpose()
    }

    fn write<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> CoreResult<T>,
    ) -> CoreResult<Option<T>> {
        let mut state = self.state.write();
        let params = state.params(name);
        state.collections.get_mut(&params.collection).map(f).transpose()
    }

    /// Like [`FileBackend::write`], creating the collection if needed.
    fn write_or_create<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut state = self.state.write();
        let collection = state.collection_mut(&self.path, self.serializer.as_ref(), name)?;
        f(collection)
    }

    fn missing(&self, name: &str) -> CoreError {
        CoreError::collection_not_found(self.collection_name(name))
    }

    fn autocommit(&self) -> CoreResult<()> {
        let due = {
            let state = self.state.read();
            state.config.autocommit && state.depth == 0
        };
        if due {
            self.commit()?;
        }
        Ok(())
    }

    /// Returns the primary-key field of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be read.
    pub fn pk_field(&self, collection: &str) -> CoreResult<String> {
        let stored = self.read(collection, |c| Ok(c.pk_field().to_string()))?;
        Ok(stored.unwrap_or_else(|| self.state.read().params(collection).pk_field))
    }

    /// Fetches a document by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if no document has the key.
    pub fn get_by_pk(&self, collection: &str, pk: &Value) -> CoreResult<Document> {
        let serializer = self.serializer.as_ref();
        self.read(collection, |c| {
            let key = c.keys_for_pk(pk)?.into_iter().next().ok_or_else(|| {
                CoreError::document_not_found(c.name(), format!("{} = {pk}", c.pk_field()))
            })?;
            Document::from_value(c.name(), c.load(&key, serializer)?)
        })?
        .ok_or_else(|| CoreError::document_not_found(self.collection_name(collection), pk.to_string()))
    }

    /// Fills in an unloaded document from storage.
    ///
    /// Loaded documents are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if the referenced document no
    /// longer exists.
    pub fn load(&self, document: &mut Document) -> CoreResult<()> {
        if document.is_loaded() {
            return Ok(());
        }
        let pk_field = self.pk_field(document.collection())?;
        let pk = document
            .get(&pk_field)
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation("unloaded document has no primary key"))?;
        let stored = self.get_by_pk(document.collection(), &pk)?;
        document.fill(stored.into_attributes());
        Ok(())
    }

    /// Turns a [`Value::Ref`] into an unloaded document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `reference` is not a
    /// reference.
    pub fn resolve(&self, reference: &Value) -> CoreResult<Document> {
        let (collection, pk) = reference
            .as_reference()
            .ok_or_else(|| CoreError::invalid_operation(format!("{reference} is not a reference")))?;
        let pk_field = self.pk_field(collection)?;
        Ok(Document::lazy(collection, &pk_field, pk.clone()))
    }

    /// Returns a reference to a saved document for embedding in another.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the document has no
    /// primary key yet.
    pub fn reference(&self, document: &Document) -> CoreResult<Value> {
        let pk_field = self.pk_field(document.collection())?;
        document
            .reference(&pk_field)
            .ok_or_else(|| CoreError::invalid_operation("document has no primary key; save it first"))
    }

    /// Applies attribute changes to a document and saves it.
    ///
    /// # Errors
    ///
    /// Returns an error if a path crosses a scalar or the save fails.
    pub fn update(
        &self,
        document: &mut Document,
        set: &[(&str, Value)],
        unset: &[&str],
    ) -> CoreResult<()> {
        self.load(document)?;
        for (path, value) in set {
            document.set(path, value.clone())?;
        }
        for path in unset {
            document.remove(path);
        }
        self.save(document)
    }

    /// Rebuilds one index from the stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no index on the field or an object
    /// cannot be read.
    pub fn rebuild_index(&self, collection: &str, field: &str) -> CoreResult<()> {
        let serializer = self.serializer.as_ref();
        self.write(collection, |c| c.rebuild_index(field, serializer))?
            .ok_or_else(|| self.missing(collection))?;
        info!(collection, field, "rebuilt index");
        Ok(())
    }

    /// Rebuilds every index of a collection from the stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if an object cannot be read.
    pub fn rebuild_indexes(&self, collection: &str) -> CoreResult<()> {
        let serializer = self.serializer.as_ref();
        self.write(collection, |c| {
            let fields: Vec<String> = c.indexes().map(|i| i.key().to_string()).collect();
            for field in fields {
                c.rebuild_index(&field, serializer)?;
            }
            Ok(())
        })?
        .ok_or_else(|| self.missing(collection))
    }

    /// Checks that indexes and objects agree.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] for an unknown collection,
    /// or an error if the object store cannot be listed.
    pub fn verify(&self, collection: &str) -> CoreResult<VerifyReport> {
        self.read(collection, |c| {
            let stored = c.stored_keys()?;
            let indexed = c.all_keys()?;
            let mut report = VerifyReport {
                collection: c.name().to_string(),
                documents: stored.len(),
                ..VerifyReport::default()
            };
            for index in c.indexes() {
                for key in index.index().get_all_keys() {
                    if !c.has_blob(&key)? {
                        report.dangling.push((index.key().to_string(), key));
                    }
                }
            }
            report.unindexed = stored
                .into_iter()
                .filter(|key| !indexed.contains(key))
                .collect();
            if !report.is_ok() {
                warn!(
                    collection = %report.collection,
                    dangling = report.dangling.len(),
                    unindexed = report.unindexed.len(),
                    "index verification failed"
                );
            }
            Ok(report)
        })?
        .ok_or_else(|| self.missing(collection))
    }

    /// Describes a collection and its indexes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] for an unknown collection.
    pub fn describe(&self, collection: &str) -> CoreResult<CollectionInfo> {
        self.read(collection, |c| {
            let indexes = c
                .indexes()
                .map(|i| IndexInfo {
                    field: i.key().to_string(),
                    unique: i.is_unique(),
                    primary: i.definition().primary,
                    ephemeral: i.is_ephemeral(),
                    values: i.index().len(),
                    documents: i.index().posted_keys(),
                })
                .collect();
            Ok(CollectionInfo {
                name: c.name().to_string(),
                pk_field: c.pk_field().to_string(),
                documents: c.all_keys()?.len(),
                indexes,
            })
        })?
        .ok_or_else(|| self.missing(collection))
    }

    /// Runs `f` inside a transaction.
    ///
    /// The outermost call begins a transaction (committing pending work),
    /// commits when `f` succeeds and rolls back when `f` or the commit
    /// fails. Nested calls join the outer transaction and leave commit and
    /// rollback to it. Autocommit is suspended while `f` runs.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the commit.
    pub fn transaction<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Self) -> CoreResult<T>,
    {
        let outermost = {
            let mut state = self.state.write();
            state.depth += 1;
            state.depth == 1
        };
        let started = if outermost {
            self.begin()
        } else {
            self.state.write().begin_nested()
        };
        let result = started.and_then(|()| f(self));
        self.state.write().depth -= 1;

        if !outermost {
            return result;
        }
        match result.and_then(|value| self.commit().map(|()| value)) {
            Ok(value) => Ok(value),
            Err(error) => Err(self.abandon(error)),
        }
    }

    fn abandon(&self, error: CoreError) -> CoreError {
        if let Err(rollback) = self.rollback() {
            warn!(error = %rollback, "rollback after failed transaction failed");
        }
        error
    }

    /// Orders storage keys of a collection by one or more fields.
    ///
    /// Missing indexes are created as ephemeral indexes first.
    ///
    /// # Errors
    ///
    /// Returns an error if an index cannot be populated.
    pub fn sort(
        &self,
        collection: &str,
        keys: Vec<StorageKey>,
        order: &[(&str, SortOrder)],
    ) -> CoreResult<Vec<StorageKey>> {
        if keys.is_empty() {
            return Ok(keys);
        }
        let serializer = self.serializer.as_ref();
        self.write(collection, |c| {
            for (field, _) in order {
                check_field(field)?;
                if !c.has_index(field) {
                    c.create_index(field, true, false, serializer)?;
                }
            }
            let c: &Collection = c;
            let indexes = order
                .iter()
                .map(|(field, direction)| {
                    c.index_on(field)
                        .map(|index| (index.index(), *direction))
                        .ok_or_else(|| CoreError::invalid_operation(format!("no index on {field}")))
                })
                .collect::<CoreResult<Vec<(&Index, SortOrder)>>>()?;
            Ok(sort::sort_keys(keys, &indexes))
        })?
        .ok_or_else(|| self.missing(collection))
    }

    pub(crate) fn materialize(&self, collection: &str, key: &StorageKey) -> CoreResult<Document> {
        let serializer = self.serializer.as_ref();
        self.read(collection, |c| {
            Document::from_value(c.name(), c.load(key, serializer)?)
        })?
        .ok_or_else(|| self.missing(collection))
    }

    pub(crate) fn collection_name(&self, name: &str) -> String {
        self.state.read().params(name).collection
    }

    pub(crate) fn keys_for_pk(&self, collection: &str, pk: &Value) -> CoreResult<KeySet> {
        Ok(self.read(collection, |c| c.keys_for_pk(pk))?.unwrap_or_default())
    }

    pub(crate) fn all_keys(&self, collection: &str) -> CoreResult<KeySet> {
        Ok(self.read(collection, Collection::all_keys)?.unwrap_or_default())
    }

    pub(crate) fn delete_keys(&self, collection: &str, keys: &KeySet) -> CoreResult<()> {
        self.write(collection, |c| c.delete_keys(keys))?;
        self.autocommit()
    }
}

fn check_field(field: &str) -> CoreResult<()> {
    if field.split('.').any(str::is_empty) {
        return Err(CoreError::invalid_operation(format!(
            "invalid field path {field:?}"
        )));
    }
    Ok(())
}

impl Backend for FileBackend {
    type QuerySet<'a> = QuerySet<'a>;

    fn register(&self, type_name: &str, params: CollectionParams) -> CoreResult<()> {
        let mut state = self.state.write();
        let collection = state.open_collection(&self.path, self.serializer.as_ref(), &params)?;
        if collection.pk_field() != params.pk_field {
            return Err(CoreError::invalid_operation(format!(
                "collection {} has primary key {}, not {}",
                params.collection,
                collection.pk_field(),
                params.pk_field
            )));
        }
        state.registry.register(type_name, params);
        Ok(())
    }

    fn save(&self, document: &mut Document) -> CoreResult<()> {
        let serializer = self.serializer.as_ref();
        let name = document.collection().to_string();
        let storage_key = self.write_or_create(&name, |c| {
            if document.get(c.pk_field()).map_or(true, Value::is_null) {
                document.set(c.pk_field(), StorageKey::generate().as_str())?;
            }
            c.save(document.attributes(), serializer)
        })?;
        debug!(collection = %name, %storage_key, "saved document");
        self.autocommit()
    }

    fn get(&self, collection: &str, query: &Value) -> CoreResult<Document> {
        let matches = self.filter(collection, query)?;
        match matches.len() {
            0 => Err(CoreError::document_not_found(collection, query.to_string())),
            1 => matches
                .get(0)?
                .ok_or_else(|| CoreError::document_not_found(collection, query.to_string())),
            count => Err(CoreError::MultipleDocuments {
                collection: collection.to_string(),
                count,
            }),
        }
    }

    fn filter<'a>(&'a self, collection: &str, query: &Value) -> CoreResult<QuerySet<'a>> {
        let expr = Expr::compile(query)?;
        let serializer = self.serializer.as_ref();
        let (name, keys) = self
            .write(collection, |c| {
                for field in expr.fields() {
                    if !c.has_index(field) {
                        c.create_index(field, true, false, serializer)?;
                    }
                }
                let keys = expr.evaluate(&*c)?;
                Ok((c.name().to_string(), keys))
            })?
            .unwrap_or_else(|| (self.collection_name(collection), KeySet::new()));
        Ok(QuerySet::new(self, name, keys.into_iter().collect()))
    }

    fn delete(&self, document: &Document) -> CoreResult<()> {
        self.write(document.collection(), |c| {
            let pk = document.get(c.pk_field()).ok_or_else(|| {
                CoreError::invalid_operation("document has no primary key")
            })?;
            let keys = c.keys_for_pk(pk)?;
            if keys.is_empty() {
                return Err(CoreError::document_not_found(
                    c.name(),
                    format!("{} = {pk}", c.pk_field()),
                ));
            }
            c.delete_keys(&keys)
        })?
        .ok_or_else(|| {
            CoreError::document_not_found(self.collection_name(document.collection()), "no such collection")
        })?;
        self.autocommit()
    }

    fn create_index(&self, collection: &str, field: &str, options: IndexOptions) -> CoreResult<()> {
        check_field(field)?;
        let mut state = self.state.write();
        let c = state.collection_mut(&self.path, self.serializer.as_ref(), collection)?;
        let name = c.name().to_string();
        let created = c.create_index(field, options.ephemeral, options.unique, self.serializer.as_ref())?;
        if let Some(definition) = created {
            state.config.add_index(&name, definition);
            state.config.save(&self.path)?;
        }
        Ok(())
    }

    fn begin(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.in_transaction {
            state.commit(self.serializer.as_ref())
        } else {
            state.begin_all()
        }
    }

    fn commit(&self) -> CoreResult<()> {
        self.state.write().commit(self.serializer.as_ref())
    }

    fn rollback(&self) -> CoreResult<()> {
        self.state.write().rollback(self.serializer.as_ref())
    }

    fn serialize(&self, value: &Value) -> CoreResult<Vec<u8>> {
        Ok(self.serializer.serialize(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> CoreResult<Value> {
        Ok(self.serializer.deserialize(bytes)?)
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("serializer", &self.serializer.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreKind;
    use shelfdb_codec::SerializerKind;
    use tempfile::{tempdir, TempDir};

    fn query(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    fn movie(title: &str, year: i64) -> Document {
        Document::new(
            "movie",
            [("title", Value::from(title)), ("year", Value::from(year))],
        )
    }

    fn open() -> (TempDir, FileBackend) {
        let dir = tempdir().unwrap();
        let db = FileBackend::open(dir.path().join("db")).unwrap();
        (dir, db)
    }

    #[test]
    fn open_writes_config_and_begins() {
        let (dir, db) = open();
        assert!(dir.path().join("db").join("config.json").exists());
        assert!(db.in_transaction());
    }

    #[test]
    fn open_missing_without_create_fails() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open_with_config(
            dir.path().join("absent"),
            Config::new().create_if_missing(false),
        );
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn stored_config_wins_unless_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        drop(FileBackend::open_with_config(&path, Config::new().serializer(SerializerKind::Cbor)).unwrap());

        let db = FileBackend::open_with_config(&path, Config::new().autocommit(true)).unwrap();
        assert_eq!(db.config().serializer, SerializerKind::Cbor);
        assert!(db.config().autocommit);
        drop(db);

        let db = FileBackend::open_with_config(
            &path,
            Config::new()
                .store(StoreKind::Compacting)
                .overwrite_config(true),
        )
        .unwrap();
        assert_eq!(db.config().serializer, SerializerKind::Json);
        assert_eq!(db.config().store, StoreKind::Compacting);
    }

    #[test]
    fn save_assigns_pk_and_get_finds_it() {
        let (_dir, db) = open();
        let mut heat = movie("Heat", 1995);
        db.save(&mut heat).unwrap();
        let pk = heat.get("pk").cloned().unwrap();
        assert_eq!(pk.as_text().map(str::len), Some(32));

        let found = db.get("movie", &query(r#"{"title": "Heat"}"#)).unwrap();
        assert_eq!(found, heat);
        assert_eq!(db.get_by_pk("movie", &pk).unwrap(), heat);
    }

    #[test]
    fn get_requires_exactly_one() {
        let (_dir, db) = open();
        db.save(&mut movie("Heat", 1995)).unwrap();
        db.save(&mut movie("Casino", 1995)).unwrap();

        assert!(matches!(
            db.get("movie", &query(r#"{"year": 1995}"#)),
            Err(CoreError::MultipleDocuments { count: 2, .. })
        ));
        assert!(db
            .get("movie", &query(r#"{"year": 2001}"#))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn rollback_discards_uncommitted_saves() {
        let (_dir, db) = open();
        db.save(&mut movie("Heat", 1995)).unwrap();
        db.commit().unwrap();
        db.save(&mut movie("Casino", 1995)).unwrap();
        assert_eq!(db.filter("movie", &query("{}")).unwrap().len(), 2);

        db.rollback().unwrap();
        assert!(db.in_transaction());
        assert_eq!(db.filter("movie", &query("{}")).unwrap().len(), 1);
    }

    #[test]
    fn index_declared_in_transaction_survives_rollback_consistently() {
        let (_dir, db) = open();
        db.save(&mut movie("Heat", 1995)).unwrap();
        db.commit().unwrap();

        db.save(&mut movie("Casino", 1995)).unwrap();
        db.create_index("movie", "year", IndexOptions::new()).unwrap();
        db.rollback().unwrap();

        let found = db.filter("movie", &query(r#"{"year": 1995}"#)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(db.verify("movie").unwrap().dangling, vec![]);
    }

    #[test]
    fn unique_violation_blocks_commit() {
        let (_dir, db) = open();
        db.create_index("movie", "title", IndexOptions::new().unique(true))
            .unwrap();
        db.save(&mut movie("Heat", 1995)).unwrap();
        db.save(&mut movie("Heat", 2001)).unwrap();

        assert!(matches!(
            db.commit(),
            Err(CoreError::UniqueViolation { ref field, .. }) if field == "title"
        ));
        assert!(db.in_transaction());
        db.rollback().unwrap();
        assert!(db.filter("movie", &query("{}")).unwrap().is_empty());
    }

    #[test]
    fn delete_unknown_document_fails() {
        let (_dir, db) = open();
        let mut ghost = movie("Ghost", 1990);
        ghost.set("pk", "nope").unwrap();
        assert!(db.delete(&ghost).unwrap_err().is_not_found());
    }

    #[test]
    fn transaction_commits_or_rolls_back() {
        let (_dir, db) = open();
        db.transaction(|db| db.save(&mut movie("Heat", 1995)))
            .unwrap();

        let failed: CoreResult<()> = db.transaction(|db| {
            db.save(&mut movie("Casino", 1995))?;
            db.transaction(|db| db.save(&mut movie("Ronin", 1998)))?;
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(failed.is_err());
        let titles: Vec<String> = db
            .filter("movie", &query("{}"))
            .unwrap()
            .to_vec()
            .unwrap()
            .into_iter()
            .filter_map(|d| d.get("title").and_then(Value::as_text).map(String::from))
            .collect();
        assert_eq!(titles, vec!["Heat".to_string()]);
    }

    #[test]
    fn autocommit_persists_each_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = FileBackend::open_with_config(&path, Config::new().autocommit(true)).unwrap();
            db.save(&mut movie("Heat", 1995)).unwrap();
        }
        let db = FileBackend::open(&path).unwrap();
        assert_eq!(db.filter("movie", &query("{}")).unwrap().len(), 1);
    }

    #[test]
    fn register_uses_custom_pk_field() {
        let (_dir, db) = open();
        db.register("Actor", CollectionParams::new("actor").pk_field("name"))
            .unwrap();
        let mut pacino = Document::new("Actor", [("name", Value::from("Al Pacino"))]);
        db.save(&mut pacino).unwrap();
        assert_eq!(pacino.attributes().as_map().unwrap().len(), 1);

        let found = db.get_by_pk("actor", &Value::from("Al Pacino")).unwrap();
        assert_eq!(found.collection(), "actor");

        assert!(db
            .register("Other", CollectionParams::new("actor"))
            .is_err());
    }

    #[test]
    fn references_resolve_lazily() {
        let (_dir, db) = open();
        let mut director = Document::new("person", [("name", Value::from("Michael Mann"))]);
        db.save(&mut director).unwrap();
        let mut heat = movie("Heat", 1995);
        heat.set("director", db.reference(&director).unwrap()).unwrap();
        db.save(&mut heat).unwrap();

        let stored = db.get("movie", &query(r#"{"title": "Heat"}"#)).unwrap();
        let mut person = db.resolve(stored.get("director").unwrap()).unwrap();
        assert!(!person.is_loaded());
        db.load(&mut person).unwrap();
        assert_eq!(person.get("name"), Some(&Value::from("Michael Mann")));
    }

    #[test]
    fn update_sets_and_unsets() {
        let (_dir, db) = open();
        let mut heat = movie("Heat", 1995);
        db.save(&mut heat).unwrap();
        db.update(&mut heat, &[("rating.imdb", Value::from(8.3))], &["year"])
            .unwrap();

        let stored = db.get("movie", &query(r#"{"rating.imdb": {"$gt": 8}}"#)).unwrap();
        assert_eq!(stored.get("year"), None);
        assert!(db
            .filter("movie", &query(r#"{"year": 1995}"#))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn persistent_index_recorded_in_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = FileBackend::open(&path).unwrap();
            db.save(&mut movie("Heat", 1995)).unwrap();
            db.create_index("movie", "year", IndexOptions::new()).unwrap();
            db.create_index("movie", "title", IndexOptions::new().ephemeral(true))
                .unwrap();
            db.commit().unwrap();
        }
        let db = FileBackend::open(&path).unwrap();
        let info = db.describe("movie").unwrap();
        let fields: Vec<&str> = info.indexes.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["pk", "year"]);
        assert_eq!(info.documents, 1);
    }

    #[test]
    fn sort_orders_keys() {
        let (_dir, db) = open();
        for (title, year) in [("Heat", 1995), ("Thief", 1981), ("Ali", 2001)] {
            db.save(&mut movie(title, year)).unwrap();
        }
        let keys: Vec<StorageKey> = db.all_keys("movie").unwrap().into_iter().collect();
        let sorted = db
            .sort("movie", keys, &[("year", SortOrder::Descending)])
            .unwrap();
        let titles: Vec<Value> = sorted
            .iter()
            .map(|k| db.materialize("movie", k).unwrap().get("title").cloned().unwrap())
            .collect();
        assert_eq!(
            titles,
            vec![Value::from("Ali"), Value::from("Heat"), Value::from("Thief")]
        );
    }

    #[test]
    fn reads_of_unknown_collection_leave_disk_untouched() {
        let (dir, db) = open();
        db.save(&mut movie("Heat", 1995)).unwrap();
        db.commit().unwrap();
        let config_path = dir.path().join("db").join("config.json");
        let before = std::fs::read(&config_path).unwrap();

        assert!(db.filter("typo", &query("{}")).unwrap().is_empty());
        assert!(db
            .filter("typo", &query(r#"{"year": {"$gt": 1900}}"#))
            .unwrap()
            .sort("year", SortOrder::Ascending)
            .unwrap()
            .is_empty());
        assert!(db.get("typo", &query(r#"{"title": "Heat"}"#)).unwrap_err().is_not_found());
        assert!(db.get_by_pk("typo", &Value::from("x")).unwrap_err().is_not_found());
        assert!(matches!(
            db.describe("typo"),
            Err(CoreError::CollectionNotFound { .. })
        ));
        assert!(matches!(
            db.verify("other_typo"),
            Err(CoreError::CollectionNotFound { .. })
        ));
        let ghost = Document::new("typo", [("pk", Value::from("x"))]);
        assert!(db.delete(&ghost).unwrap_err().is_not_found());
        db.commit().unwrap();

        assert_eq!(std::fs::read(&config_path).unwrap(), before);
        assert!(!dir.path().join("db").join("typo").exists());
        assert!(!dir.path().join("db").join("other_typo").exists());
        assert_eq!(db.collection_names(), vec!["movie".to_string()]);
    }

    #[test]
    fn infinite_float_rejected_by_json_kept_by_cbor() {
        let (_dir, db) = open();
        let mut doc = movie("Solaris", 1972);
        doc.set("score", Value::Float(f64::INFINITY)).unwrap();
        assert!(matches!(db.save(&mut doc), Err(CoreError::Codec(_))));
        assert!(db.filter("movie", &query("{}")).unwrap().is_empty());
        assert!(db.verify("movie").unwrap().is_ok());

        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let pk = {
            let db = FileBackend::open_with_config(
                &path,
                Config::new().serializer(SerializerKind::Cbor),
            )
            .unwrap();
            let mut doc = movie("Solaris", 1972);
            doc.set("score", Value::Float(f64::INFINITY)).unwrap();
            db.save(&mut doc).unwrap();
            db.commit().unwrap();
            doc.get("pk").cloned().unwrap()
        };
        let db = FileBackend::open(&path).unwrap();
        let stored = db.get_by_pk("movie", &pk).unwrap();
        assert_eq!(stored.get("score"), Some(&Value::Float(f64::INFINITY)));
        let huge = db
            .filter("movie", &query(r#"{"score": {"$gt": 1e300}}"#))
            .unwrap();
        assert_eq!(huge.len(), 1);
    }

    #[test]
    fn create_index_upgrades_to_unique_only_without_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = FileBackend::open(&path).unwrap();
            db.create_index("movie", "year", IndexOptions::new()).unwrap();
            db.save(&mut movie("Heat", 1995)).unwrap();
            db.save(&mut movie("Casino", 1995)).unwrap();
            db.commit().unwrap();

            assert!(matches!(
                db.create_index("movie", "year", IndexOptions::new().unique(true)),
                Err(CoreError::UniqueViolation { ref field, .. }) if field == "year"
            ));
            let year = |db: &FileBackend| {
                db.describe("movie")
                    .unwrap()
                    .indexes
                    .into_iter()
                    .find(|i| i.field == "year")
                    .unwrap()
            };
            assert!(!year(&db).unique);

            let casino = db.get("movie", &query(r#"{"title": "Casino"}"#)).unwrap();
            db.delete(&casino).unwrap();
            db.create_index("movie", "year", IndexOptions::new().unique(true))
                .unwrap();
            assert!(year(&db).unique);
            db.commit().unwrap();
        }
        let db = FileBackend::open(&path).unwrap();
        let indexes = db.describe("movie").unwrap().indexes;
        assert!(indexes.iter().any(|i| i.field == "year" && i.unique));
    }

    #[test]
    fn failed_rollback_keeps_transaction_open_and_can_be_retried() {
        let (dir, db) = open();
        db.save(&mut movie("Heat", 1995)).unwrap();
        db.commit().unwrap();
        db.create_index("movie", "year", IndexOptions::new()).unwrap();

        let key = db.all_keys("movie").unwrap().into_iter().next().unwrap();
        let object = dir
            .path()
            .join("db")
            .join("movie")
            .join("objects")
            .join(key.as_str());
        let original = std::fs::read(&object).unwrap();
        std::fs::write(&object, b"not a document").unwrap();

        assert!(db.rollback().is_err());
        assert!(db.in_transaction());

        std::fs::write(&object, original).unwrap();
        db.rollback().unwrap();
        assert!(db.in_transaction());
        assert_eq!(db.filter("movie", &query(r#"{"year": 1995}"#)).unwrap().len(), 1);
        assert!(db.verify("movie").unwrap().is_ok());
    }

    #[test]
    fn malformed_query_rejected() {
        let (_dir, db) = open();
        assert!(matches!(
            db.filter("movie", &query(r#"{"$nor": []}"#)),
            Err(CoreError::MalformedQuery { .. })
        ));
    }
}
