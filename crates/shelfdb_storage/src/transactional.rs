//! Transactional staging over a blob store.

use crate::blob::{validate_key, BlobStore};
use crate::error::{StorageError, StorageResult};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Wraps a [`BlobStore`] with an in-memory update/delete delta.
///
/// While a transaction is open, `store` and `delete` only touch the delta
/// and never the wrapped store. Reads consult the delta first and fall
/// back to the wrapped store, so a transaction observes its own writes.
///
/// `commit` flushes deletes before updates and leaves a fresh, empty
/// transaction open. `rollback` discards the delta and closes the
/// transaction. Outside a transaction all operations pass straight through.
///
/// Only one transaction level exists: `begin` while a transaction is open
/// commits the open one first; [`TransactionalStore::begin_nested`] joins
/// it instead.
#[derive(Debug)]
pub struct TransactionalStore<S> {
    inner: S,
    update_cache: HashMap<String, Vec<u8>>,
    delete_cache: HashSet<String>,
    in_transaction: bool,
}

impl<S: BlobStore> TransactionalStore<S> {
    /// Wraps `inner`. No transaction is open initially.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            update_cache: HashMap::new(),
            delete_cache: HashSet::new(),
            in_transaction: false,
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns true while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Returns the number of staged updates and deletes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.update_cache.len() + self.delete_cache.len()
    }

    /// Opens a transaction, committing any open one first.
    ///
    /// # Errors
    ///
    /// Returns an error if the implicit commit fails.
    pub fn begin(&mut self) -> StorageResult<()> {
        if self.in_transaction {
            self.commit()?;
        }
        self.update_cache.clear();
        self.delete_cache.clear();
        self.in_transaction = true;
        Ok(())
    }

    /// Opens a transaction unless one is already open, in which case the
    /// caller joins it.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match [`TransactionalStore::begin`].
    pub fn begin_nested(&mut self) -> StorageResult<()> {
        if !self.in_transaction {
            self.begin()?;
        }
        Ok(())
    }

    /// Flushes the delta into the wrapped store and opens a new empty
    /// transaction.
    ///
    /// Deletes are applied before updates. Entries are removed from the
    /// delta as they land, so a failed commit leaves only the unflushed
    /// remainder staged.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInTransaction`] if no transaction is open,
    /// or the first error reported by the wrapped store.
    pub fn commit(&mut self) -> StorageResult<()> {
        if !self.in_transaction {
            return Err(StorageError::NotInTransaction);
        }

        let deletes = self.delete_cache.len();
        let updates = self.update_cache.len();

        let mut doomed: Vec<String> = self.delete_cache.iter().cloned().collect();
        doomed.sort();
        for key in doomed {
            self.inner.delete(&key)?;
            self.delete_cache.remove(&key);
        }

        let mut keys: Vec<String> = self.update_cache.keys().cloned().collect();
        keys.sort();
        for key in keys {
            if let Some(data) = self.update_cache.get(&key) {
                self.inner.store(&key, data)?;
            }
            self.update_cache.remove(&key);
        }

        debug!(deletes, updates, "committed store delta");
        Ok(())
    }

    /// Discards the delta and closes the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInTransaction`] if no transaction is open.
    pub fn rollback(&mut self) -> StorageResult<()> {
        if !self.in_transaction {
            return Err(StorageError::NotInTransaction);
        }
        debug!(discarded = self.pending(), "rolled back store delta");
        self.update_cache.clear();
        self.delete_cache.clear();
        self.in_transaction = false;
        Ok(())
    }
}

impl<S: BlobStore> BlobStore for TransactionalStore<S> {
    fn store(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        if !self.in_transaction {
            return self.inner.store(key, data);
        }
        validate_key(key)?;
        self.delete_cache.remove(key);
        self.update_cache.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        if self.in_transaction {
            if self.delete_cache.contains(key) {
                return Err(StorageError::not_found(key));
            }
            if let Some(data) = self.update_cache.get(key) {
                return Ok(data.clone());
            }
        }
        self.inner.get(key)
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        if !self.in_transaction {
            return self.inner.delete(key);
        }
        self.update_cache.remove(key);
        self.delete_cache.insert(key.to_string());
        Ok(())
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        if self.in_transaction {
            if self.delete_cache.contains(key) {
                return Ok(false);
            }
            if self.update_cache.contains_key(key) {
                return Ok(true);
            }
        }
        self.inner.has(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: BTreeSet<String> = self.inner.keys()?.into_iter().collect();
        if self.in_transaction {
            keys.retain(|k| !self.delete_cache.contains(k));
            keys.extend(self.update_cache.keys().cloned());
        }
        Ok(keys.into_iter().collect())
    }
}
