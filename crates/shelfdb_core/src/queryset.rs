//! Lazy query results.

use crate::backend::FileBackend;
use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::types::{KeySet, SortOrder, StorageKey};
use crate::Backend;
use parking_lot::Mutex;
use shelfdb_codec::Value;
use std::collections::{BTreeSet, HashMap};
use std::ops::{BitAnd, BitOr, Bound, Not, RangeBounds};

/// An ordered sequence of storage keys from one collection.
///
/// Documents are read from the backend the first time they are accessed
/// and cached for the lifetime of the set. Set operations (`&`, `|`, `!`)
/// combine key sets without reading any document; they fail if the
/// operands come from different collections.
///
/// Two query sets are equal when they hold the same keys of the same
/// collection, regardless of order.
pub struct QuerySet<'a> {
    backend: &'a FileBackend,
    collection: String,
    keys: Vec<StorageKey>,
    cache: Mutex<HashMap<StorageKey, Document>>,
}

impl<'a> QuerySet<'a> {
    pub(crate) fn new(backend: &'a FileBackend, collection: String, keys: Vec<StorageKey>) -> Self {
        Self {
            backend,
            collection,
            keys,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn derive(&self, keys: Vec<StorageKey>) -> Self {
        Self::new(self.backend, self.collection.clone(), keys)
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the storage keys in order.
    #[must_use]
    pub fn keys(&self) -> &[StorageKey] {
        &self.keys
    }

    /// Returns the number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no document matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the document at `position`, reading it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorruption`] if the document's blob is
    /// missing.
    pub fn get(&self, position: usize) -> CoreResult<Option<Document>> {
        let Some(key) = self.keys.get(position) else {
            return Ok(None);
        };
        if let Some(document) = self.cache.lock().get(key) {
            return Ok(Some(document.clone()));
        }
        let document = self.backend.materialize(&self.collection, key)?;
        self.cache.lock().insert(key.clone(), document.clone());
        Ok(Some(document))
    }

    /// Returns the first document.
    ///
    /// # Errors
    ///
    /// See [`QuerySet::get`].
    pub fn first(&self) -> CoreResult<Option<Document>> {
        self.get(0)
    }

    /// Iterates over the documents in order.
    pub fn iter(&self) -> impl Iterator<Item = CoreResult<Document>> + '_ {
        (0..self.keys.len()).filter_map(move |i| self.get(i).transpose())
    }

    /// Reads every document.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn to_vec(&self) -> CoreResult<Vec<Document>> {
        self.iter().collect()
    }

    /// Returns the sub-sequence in `range`, clamped to the set.
    #[must_use]
    pub fn slice(&self, range: impl RangeBounds<usize>) -> QuerySet<'a> {
        let len = self.keys.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        }
        .clamp(start, len);
        self.derive(self.keys[start..end].to_vec())
    }

    /// Returns true if the set holds the stored version of `document`.
    ///
    /// Membership is decided by primary key, so an unsaved document is
    /// never contained.
    ///
    /// # Errors
    ///
    /// Returns an error if the document's collection cannot be opened.
    pub fn contains(&self, document: &Document) -> CoreResult<bool> {
        if self.backend.collection_name(document.collection()) != self.collection {
            return Ok(false);
        }
        let pk_field = self.backend.pk_field(&self.collection)?;
        let Some(pk) = document.get(&pk_field) else {
            return Ok(false);
        };
        let stored = self.backend.keys_for_pk(&self.collection, pk)?;
        Ok(self.keys.iter().any(|key| stored.contains(key)))
    }

    /// Deletes every document in the set and empties it.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion cannot be staged.
    pub fn delete(&mut self) -> CoreResult<()> {
        let keys: KeySet = self.keys.drain(..).collect();
        self.cache.lock().clear();
        self.backend.delete_keys(&self.collection, &keys)
    }

    /// Returns the set ordered by one field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field cannot be indexed.
    pub fn sort(&self, field: &str, order: SortOrder) -> CoreResult<QuerySet<'a>> {
        self.sort_by(&[(field, order)])
    }

    /// Returns the set ordered by several fields, most significant first.
    ///
    /// # Errors
    ///
    /// Returns an error if a field cannot be indexed.
    pub fn sort_by(&self, order: &[(&str, SortOrder)]) -> CoreResult<QuerySet<'a>> {
        let keys = self
            .backend
            .sort(&self.collection, self.keys.clone(), order)?;
        Ok(self.derive(keys))
    }

    /// Narrows the set to documents that also match `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is malformed.
    pub fn filter(&self, query: &Value) -> CoreResult<QuerySet<'a>> {
        let matching: KeySet = self
            .backend
            .filter(&self.collection, query)?
            .keys
            .into_iter()
            .collect();
        Ok(self.retain(|key| matching.contains(key)))
    }

    fn retain(&self, keep: impl Fn(&StorageKey) -> bool) -> QuerySet<'a> {
        self.derive(self.keys.iter().filter(|k| keep(k)).cloned().collect())
    }

    fn same_collection(&self, other: &QuerySet<'_>) -> CoreResult<()> {
        if self.collection == other.collection {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "cannot combine query sets of {} and {}",
                self.collection, other.collection
            )))
        }
    }

    /// Documents in both sets, in the order of `self`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] across collections.
    pub fn intersection(&self, other: &QuerySet<'_>) -> CoreResult<QuerySet<'a>> {
        self.same_collection(other)?;
        let theirs: KeySet = other.keys.iter().cloned().collect();
        Ok(self.retain(|key| theirs.contains(key)))
    }

    /// Documents in either set: those of `self`, then the rest of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] across collections.
    pub fn union(&self, other: &QuerySet<'_>) -> CoreResult<QuerySet<'a>> {
        self.same_collection(other)?;
        let mut seen: KeySet = self.keys.iter().cloned().collect();
        let mut keys = self.keys.clone();
        for key in &other.keys {
            if seen.insert(key.clone()) {
                keys.push(key.clone());
            }
        }
        Ok(self.derive(keys))
    }

    /// Documents of the collection not in this set.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection's keys cannot be listed.
    pub fn complement(&self) -> CoreResult<QuerySet<'a>> {
        let mine: KeySet = self.keys.iter().cloned().collect();
        let keys = self
            .backend
            .all_keys(&self.collection)?
            .into_iter()
            .filter(|key| !mine.contains(key))
            .collect();
        Ok(self.derive(keys))
    }
}

impl<'a> BitAnd<&QuerySet<'_>> for &QuerySet<'a> {
    type Output = CoreResult<QuerySet<'a>>;

    fn bitand(self, other: &QuerySet<'_>) -> Self::Output {
        self.intersection(other)
    }
}

impl<'a> BitOr<&QuerySet<'_>> for &QuerySet<'a> {
    type Output = CoreResult<QuerySet<'a>>;

    fn bitor(self, other: &QuerySet<'_>) -> Self::Output {
        self.union(other)
    }
}

impl<'a> Not for &QuerySet<'a> {
    type Output = CoreResult<QuerySet<'a>>;

    fn not(self) -> Self::Output {
        self.complement()
    }
}

impl PartialEq for QuerySet<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection
            && self.keys.iter().collect::<BTreeSet<_>>() == other.keys.iter().collect::<BTreeSet<_>>()
    }
}

impl std::fmt::Debug for QuerySet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("collection", &self.collection)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
