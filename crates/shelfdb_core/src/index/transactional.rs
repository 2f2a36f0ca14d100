//! Snapshot-based transaction staging for an index.

use crate::config::IndexDefinition;
use crate::error::{CoreError, CoreResult};
use crate::index::postings::Index;
use crate::types::StorageKey;
use shelfdb_codec::{Serializer, Value};
use shelfdb_storage::BlobStore;
use tracing::debug;

/// Name of the blob holding an index's postings.
pub const ALL_KEYS_BLOB: &str = "all_keys";

/// An [`Index`] with begin/commit/rollback and optional persistence.
///
/// `begin` snapshots the full index; `rollback` restores that snapshot.
/// An index declared inside an open transaction has no snapshot, so its
/// `rollback` fails with [`CoreError::NotInTransaction`] and the owner must
/// rebuild it from the (rolled back) object store instead.
///
/// Persistent indexes write their postings to the [`ALL_KEYS_BLOB`] blob of
/// their index store on commit. Ephemeral indexes have no store.
pub struct TransactionalIndex {
    definition: IndexDefinition,
    index: Index,
    snapshot: Option<(Index, bool)>,
    store: Option<Box<dyn BlobStore>>,
    loaded: bool,
    dirty: bool,
}

impl TransactionalIndex {
    /// Opens a persistent index, loading its postings if they were saved.
    ///
    /// When no postings blob exists the index starts empty and
    /// [`TransactionalIndex::is_loaded`] reports false, telling the owner
    /// to rebuild it.
    ///
    /// # Errors
    ///
    /// Returns an error if the postings blob exists but cannot be read.
    pub fn persistent(
        definition: IndexDefinition,
        store: Box<dyn BlobStore>,
        serializer: &dyn Serializer,
    ) -> CoreResult<Self> {
        let (index, loaded) = if store.has(ALL_KEYS_BLOB)? {
            let pairs = serializer.deserialize(&store.get(ALL_KEYS_BLOB)?)?;
            (Index::from_pairs(definition.key.clone(), &pairs)?, true)
        } else {
            (Index::new(definition.key.clone()), false)
        };
        Ok(Self {
            definition,
            index,
            snapshot: None,
            store: Some(store),
            loaded,
            dirty: false,
        })
    }

    /// Creates an ephemeral index that is never written to disk.
    pub fn ephemeral(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            definition: IndexDefinition {
                id: String::new(),
                key: key.clone(),
                unique: false,
                primary: false,
            },
            index: Index::new(key),
            snapshot: None,
            store: None,
            loaded: false,
            dirty: false,
        }
    }

    /// Returns the index definition.
    #[must_use]
    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// Returns the indexed path.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.definition.key
    }

    /// Returns true if duplicate values are rejected at commit.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.definition.unique
    }

    /// Returns true if this index is never persisted.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.store.is_none()
    }

    /// Returns true if the postings were loaded or rebuilt.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Returns true if a transaction snapshot is held.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Returns the live postings.
    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Turns an ephemeral index into a persistent one.
    pub fn persist_to(&mut self, definition: IndexDefinition, store: Box<dyn BlobStore>) {
        self.definition = definition;
        self.store = Some(store);
        self.dirty = true;
    }

    /// See [`Index::add_key`].
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be hashed.
    pub fn add_key(&mut self, attributes: &Value, storage_key: &StorageKey) -> CoreResult<()> {
        self.dirty = true;
        self.index.add_key(attributes, storage_key)
    }

    /// See [`Index::remove_key`].
    pub fn remove_key(&mut self, storage_key: &StorageKey) {
        self.dirty = true;
        self.index.remove_key(storage_key);
    }

    /// Replaces all postings with those of `documents`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be hashed.
    pub fn rebuild<I>(&mut self, documents: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (StorageKey, Value)>,
    {
        self.index.clear();
        let mut count = 0usize;
        for (storage_key, attributes) in documents {
            self.index.add_key(&attributes, &storage_key)?;
            count += 1;
        }
        self.loaded = true;
        self.dirty = true;
        debug!(key = %self.definition.key, documents = count, "rebuilt index");
        Ok(())
    }

    /// Snapshots the postings.
    pub fn begin(&mut self) {
        self.snapshot = Some((self.index.clone(), self.dirty));
    }

    /// Returns the first value posted for more than one storage key.
    #[must_use]
    pub fn duplicate_value(&self) -> Option<&Value> {
        if !self.definition.unique {
            return None;
        }
        self.index
            .entries()
            .find(|(_, keys)| keys.len() > 1)
            .map(|(value, _)| value)
    }

    /// Starts rejecting duplicates.
    ///
    /// If a value is already posted for more than one storage key the index
    /// stays non-unique and that value is returned.
    pub fn make_unique(&mut self) -> Option<Value> {
        self.definition.unique = true;
        let duplicate = self.duplicate_value().cloned();
        if duplicate.is_some() {
            self.definition.unique = false;
        }
        duplicate
    }

    /// Persists the postings if they changed and drops the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the postings cannot be serialized or written.
    pub fn commit(&mut self, serializer: &dyn Serializer) -> CoreResult<()> {
        if self.dirty {
            if let Some(store) = self.store.as_mut() {
                let bytes = serializer.serialize(&self.index.to_pairs())?;
                store.store(ALL_KEYS_BLOB, &bytes)?;
                debug!(key = %self.definition.key, values = self.index.len(), "persisted index");
            }
            self.dirty = false;
        }
        self.snapshot = None;
        Ok(())
    }

    /// Restores the snapshot taken by [`TransactionalIndex::begin`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInTransaction`] if there is no snapshot.
    pub fn rollback(&mut self) -> CoreResult<()> {
        let (index, dirty) = self.snapshot.take().ok_or(CoreError::NotInTransaction)?;
        self.index = index;
        self.dirty = dirty;
        Ok(())
    }
}

impl std::fmt::Debug for TransactionalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalIndex")
            .field("definition", &self.definition)
            .field("values", &self.index.len())
            .field("ephemeral", &self.is_ephemeral())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
