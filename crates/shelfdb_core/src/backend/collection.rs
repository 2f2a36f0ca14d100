//! Per-collection state: the object store plus its indexes.

use crate::config::{Config, IndexDefinition, StoreKind};
use crate::error::{CoreError, CoreResult};
use crate::index::{Index, TransactionalIndex};
use crate::query::Resolver;
use crate::types::{KeySet, StorageKey};
use shelfdb_codec::{Serializer, Value};
use shelfdb_storage::{
    BlobStore, CompactingBlobStore, FileBlobStore, StorageError, TransactionalStore,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const OBJECTS_DIR: &str = "objects";
const INDEXES_DIR: &str = "indexes";

/// One collection: `<root>/<name>/objects` and `<root>/<name>/indexes/<id>`.
pub(crate) struct Collection {
    name: String,
    pk_field: String,
    dir: PathBuf,
    store: TransactionalStore<Box<dyn BlobStore>>,
    indexes: BTreeMap<String, TransactionalIndex>,
}

impl Collection {
    /// Opens a collection, creating its primary-key index if needed.
    ///
    /// The primary-key field comes from the stored primary index
    /// definition when there is one, else from `pk_field`. Returns whether
    /// `config` gained a definition and must be saved.
    pub(crate) fn open(
        root: &Path,
        name: &str,
        pk_field: &str,
        config: &mut Config,
        serializer: &dyn Serializer,
    ) -> CoreResult<(Self, bool)> {
        shelfdb_storage::validate_key(name)?;
        let dir = root.join(name);
        let objects = dir.join(OBJECTS_DIR);
        let store: Box<dyn BlobStore> = match config.store {
            StoreKind::File => Box::new(FileBlobStore::open(&objects)?),
            StoreKind::Compacting => Box::new(CompactingBlobStore::open_with_fan_out(
                &objects,
                config.pack_fan_out,
            )?),
        };

        let mut changed = false;
        let stored_pk = config
            .indexes_for(name)
            .and_then(|defs| defs.values().find(|d| d.primary))
            .map(|d| d.key.clone());
        let pk_field = match stored_pk {
            Some(field) => field,
            None => {
                config.add_index(
                    name,
                    IndexDefinition {
                        id: new_index_id(),
                        key: pk_field.to_string(),
                        unique: true,
                        primary: true,
                    },
                );
                changed = true;
                pk_field.to_string()
            }
        };

        let mut collection = Self {
            name: name.to_string(),
            pk_field,
            dir,
            store: TransactionalStore::new(store),
            indexes: BTreeMap::new(),
        };

        let definitions: Vec<IndexDefinition> = config
            .indexes_for(name)
            .map(|defs| defs.values().cloned().collect())
            .unwrap_or_default();
        for definition in definitions {
            let store = collection.index_store(&definition.id)?;
            let index = TransactionalIndex::persistent(definition, store, serializer)?;
            collection.indexes.insert(index.key().to_string(), index);
        }

        let stale: Vec<String> = collection
            .indexes
            .iter()
            .filter(|(_, index)| !index.is_loaded())
            .map(|(field, _)| field.clone())
            .collect();
        for field in stale {
            info!(collection = name, field = %field, "index not on disk, rebuilding");
            collection.rebuild_index(&field, serializer)?;
        }

        Ok((collection, changed))
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn pk_field(&self) -> &str {
        &self.pk_field
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = &TransactionalIndex> {
        self.indexes.values()
    }

    pub(crate) fn has_index(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }

    pub(crate) fn index_on(&self, field: &str) -> Option<&TransactionalIndex> {
        self.indexes.get(field)
    }

    fn primary(&self) -> CoreResult<&TransactionalIndex> {
        self.indexes.get(&self.pk_field).ok_or_else(|| {
            CoreError::invalid_format(format!("collection {} has no primary index", self.name))
        })
    }

    fn index_store(&self, id: &str) -> CoreResult<Box<dyn BlobStore>> {
        shelfdb_storage::validate_key(id)?;
        let dir = self.dir.join(INDEXES_DIR).join(id);
        Ok(Box::new(FileBlobStore::open(&dir)?))
    }

    /// Storage keys holding the document with primary key `pk`.
    pub(crate) fn keys_for_pk(&self, pk: &Value) -> CoreResult<KeySet> {
        self.primary()?.index().get_keys_for(pk)
    }

    /// Every storage key of the collection, per the primary-key index.
    pub(crate) fn all_keys(&self) -> CoreResult<KeySet> {
        Ok(self.primary()?.index().get_all_keys())
    }

    /// Reads every stored document straight from the object store.
    fn scan(&self, serializer: &dyn Serializer) -> CoreResult<Vec<(StorageKey, Value)>> {
        let keys = self.store.keys()?;
        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            let attributes = serializer.deserialize(&self.store.get(&key)?)?;
            documents.push((StorageKey::from(key), attributes));
        }
        Ok(documents)
    }

    /// Loads the attributes stored under a storage key.
    ///
    /// A missing blob means an index pointed at it, which is reported as
    /// [`CoreError::IndexCorruption`].
    pub(crate) fn load(&self, key: &StorageKey, serializer: &dyn Serializer) -> CoreResult<Value> {
        match self.store.get(key.as_str()) {
            Ok(bytes) => Ok(serializer.deserialize(&bytes)?),
            Err(StorageError::NotFound { .. }) => {
                Err(CoreError::index_corruption(&self.name, key.as_str()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns true if a blob exists for the storage key.
    pub(crate) fn has_blob(&self, key: &StorageKey) -> CoreResult<bool> {
        Ok(self.store.has(key.as_str())?)
    }

    /// Every key in the object store, including staged writes.
    pub(crate) fn stored_keys(&self) -> CoreResult<Vec<StorageKey>> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .map(StorageKey::from)
            .collect())
    }

    /// Writes a document and indexes it. Returns its storage key.
    pub(crate) fn save(
        &mut self,
        attributes: &Value,
        serializer: &dyn Serializer,
    ) -> CoreResult<StorageKey> {
        let pk = attributes.get(&self.pk_field).ok_or_else(|| {
            CoreError::invalid_operation(format!("document has no {} attribute", self.pk_field))
        })?;
        let mut existing = self.keys_for_pk(pk)?.into_iter();
        let storage_key = existing.next().unwrap_or_else(StorageKey::generate);
        let extra: KeySet = existing.collect();
        if !extra.is_empty() {
            self.delete_keys(&extra)?;
        }

        let bytes = serializer.serialize(attributes)?;
        self.store.store(storage_key.as_str(), &bytes)?;
        for index in self.indexes.values_mut() {
            index.add_key(attributes, &storage_key)?;
        }
        Ok(storage_key)
    }

    /// Deletes blobs and postings for the storage keys.
    pub(crate) fn delete_keys(&mut self, keys: &KeySet) -> CoreResult<()> {
        for key in keys {
            self.store.delete(key.as_str())?;
            for index in self.indexes.values_mut() {
                index.remove_key(key);
            }
        }
        Ok(())
    }

    /// Adds an index and populates it from the stored documents.
    ///
    /// The new index takes no snapshot, so rolling back the enclosing
    /// transaction rebuilds it. An existing ephemeral index is made
    /// persistent when a persistent one is requested, and an existing
    /// persistent index is made unique when asked and its postings allow.
    /// Returns the definition to record in the configuration, if any.
    pub(crate) fn create_index(
        &mut self,
        field: &str,
        ephemeral: bool,
        unique: bool,
        serializer: &dyn Serializer,
    ) -> CoreResult<Option<IndexDefinition>> {
        if let Some(existing) = self.indexes.get_mut(field) {
            if !existing.is_ephemeral() {
                if !unique || existing.is_unique() {
                    return Ok(None);
                }
                if let Some(value) = existing.make_unique() {
                    return Err(CoreError::UniqueViolation {
                        collection: self.name.clone(),
                        field: field.to_string(),
                        value,
                    });
                }
                info!(collection = %self.name, field, "index made unique");
                return Ok(Some(existing.definition().clone()));
            }
            if ephemeral {
                return Ok(None);
            }
        }

        if ephemeral {
            let mut index = TransactionalIndex::ephemeral(field);
            index.rebuild(self.scan(serializer)?)?;
            debug!(collection = %self.name, field, "created ephemeral index");
            self.indexes.insert(field.to_string(), index);
            return Ok(None);
        }

        let definition = IndexDefinition {
            id: new_index_id(),
            key: field.to_string(),
            unique,
            primary: false,
        };
        let store = self.index_store(&definition.id)?;
        match self.indexes.get_mut(field) {
            Some(index) => {
                index.persist_to(definition.clone(), store);
                info!(collection = %self.name, field, unique, "persisted ephemeral index");
            }
            None => {
                let mut index = TransactionalIndex::persistent(definition.clone(), store, serializer)?;
                index.rebuild(self.scan(serializer)?)?;
                info!(collection = %self.name, field, unique, "created index");
                self.indexes.insert(field.to_string(), index);
            }
        }
        Ok(Some(definition))
    }

    /// Repopulates one index from the object store.
    pub(crate) fn rebuild_index(&mut self, field: &str, serializer: &dyn Serializer) -> CoreResult<()> {
        let documents = self.scan(serializer)?;
        let index = self.indexes.get_mut(field).ok_or_else(|| {
            CoreError::invalid_operation(format!("no index on {}.{field}", self.name))
        })?;
        index.rebuild(documents)
    }

    /// Fails on the first unique index holding a duplicated value.
    pub(crate) fn check_unique(&self) -> CoreResult<()> {
        for index in self.indexes.values() {
            if let Some(value) = index.duplicate_value() {
                warn!(collection = %self.name, field = index.key(), %value, "unique index violated");
                return Err(CoreError::UniqueViolation {
                    collection: self.name.clone(),
                    field: index.key().to_string(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn begin(&mut self) -> CoreResult<()> {
        self.store.begin()?;
        for index in self.indexes.values_mut() {
            index.begin();
        }
        Ok(())
    }

    pub(crate) fn begin_nested(&mut self) -> CoreResult<()> {
        self.store.begin_nested()?;
        for index in self.indexes.values_mut() {
            if !index.in_transaction() {
                index.begin();
            }
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self, serializer: &dyn Serializer) -> CoreResult<()> {
        self.store.commit()?;
        for index in self.indexes.values_mut() {
            index.commit(serializer)?;
        }
        Ok(())
    }

    /// Discards staged writes and restores every index.
    ///
    /// Indexes without a snapshot (created during the transaction, or
    /// already restored by an earlier attempt that failed) are rebuilt from
    /// the rolled-back object store, so a failed rollback can be retried.
    pub(crate) fn rollback(&mut self, serializer: &dyn Serializer) -> CoreResult<()> {
        if self.store.in_transaction() {
            self.store.rollback()?;
        }
        let mut stale = Vec::new();
        for (field, index) in &mut self.indexes {
            match index.rollback() {
                Ok(()) => {}
                Err(CoreError::NotInTransaction) => stale.push(field.clone()),
                Err(e) => return Err(e),
            }
        }
        for field in stale {
            debug!(collection = %self.name, field = %field, "index created in transaction, rebuilding");
            self.rebuild_index(&field, serializer)?;
        }
        Ok(())
    }
}

impl Resolver for Collection {
    fn index(&self, field: &str) -> CoreResult<&Index> {
        self.indexes
            .get(field)
            .map(TransactionalIndex::index)
            .ok_or_else(|| CoreError::invalid_operation(format!("no index on {}.{field}", self.name)))
    }

    fn all_keys(&self) -> CoreResult<KeySet> {
        Collection::all_keys(self)
    }
}

fn new_index_id() -> String {
    Uuid::new_v4().simple().to_string()
}
