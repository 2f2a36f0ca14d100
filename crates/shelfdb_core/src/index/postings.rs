//! Inverted index over one dotted attribute path.

use crate::error::{CoreError, CoreResult};
use crate::types::{KeySet, StorageKey};
use shelfdb_codec::Value;
use std::collections::HashMap;

/// One forward entry: the raw indexed value and its posting list.
#[derive(Debug, Clone)]
struct PostingEntry {
    value: Value,
    keys: KeySet,
}

/// Forward and reverse posting lists for one attribute path.
///
/// The forward map goes from the hashable form of a value
/// ([`Value::hash_key`]) to the storage keys holding it; raw values are
/// retained beside the hash so range and regex operators can compare
/// them. The reverse map goes from a storage key to the hashes it is
/// posted under, which makes removal proportional to the postings of that
/// key rather than to the index size.
///
/// The index is sparse: documents without the path are not posted. A
/// sequence value is multikey: each element is posted, and so is the
/// whole sequence, so equality matches either an element or the full list.
#[derive(Debug, Clone, Default)]
pub struct Index {
    key: String,
    forward: HashMap<Vec<u8>, PostingEntry>,
    reverse: HashMap<StorageKey, Vec<Vec<u8>>>,
}

impl Index {
    /// Creates an empty index over a dotted path.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Returns the indexed path.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the number of distinct indexed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Returns true if nothing is posted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Returns the number of storage keys with at least one posting.
    #[must_use]
    pub fn posted_keys(&self) -> usize {
        self.reverse.len()
    }

    /// Indexes a document's attributes under `storage_key`.
    ///
    /// Prior postings for the key are removed first, so calling this again
    /// after an update replaces the old values. Documents missing the path
    /// end up with no postings.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be hashed (it contains NaN).
    pub fn add_key(&mut self, attributes: &Value, storage_key: &StorageKey) -> CoreResult<()> {
        self.remove_key(storage_key);

        let Some(value) = attributes.get_path(&self.key) else {
            return Ok(());
        };

        let mut values: Vec<&Value> = Vec::new();
        if let Value::Array(items) = value {
            values.extend(items.iter());
        }
        values.push(value);

        let mut hashes: Vec<Vec<u8>> = Vec::with_capacity(values.len());
        for value in values {
            let hash = value.hash_key()?;
            if hashes.contains(&hash) {
                continue;
            }
            self.forward
                .entry(hash.clone())
                .or_insert_with(|| PostingEntry {
                    value: value.clone(),
                    keys: KeySet::new(),
                })
                .keys
                .insert(storage_key.clone());
            hashes.push(hash);
        }
        self.reverse.insert(storage_key.clone(), hashes);
        Ok(())
    }

    /// Removes every posting of `storage_key`.
    pub fn remove_key(&mut self, storage_key: &StorageKey) {
        let Some(hashes) = self.reverse.remove(storage_key) else {
            return;
        };
        for hash in hashes {
            if let Some(entry) = self.forward.get_mut(&hash) {
                entry.keys.remove(storage_key);
                if entry.keys.is_empty() {
                    self.forward.remove(&hash);
                }
            }
        }
    }

    /// Returns the storage keys posted under a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be hashed.
    pub fn get_keys_for(&self, value: &Value) -> CoreResult<KeySet> {
        let hash = value.hash_key()?;
        Ok(self
            .forward
            .get(&hash)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default())
    }

    /// Returns the storage keys of every value accepted by `predicate`.
    ///
    /// This scans all forward entries.
    pub fn get_keys_matching<F>(&self, predicate: F) -> KeySet
    where
        F: Fn(&Value) -> bool,
    {
        let mut keys = KeySet::new();
        for entry in self.forward.values() {
            if predicate(&entry.value) {
                keys.extend(entry.keys.iter().cloned());
            }
        }
        keys
    }

    /// Returns every storage key with at least one posting.
    #[must_use]
    pub fn get_all_keys(&self) -> KeySet {
        self.reverse.keys().cloned().collect()
    }

    /// Returns true if `storage_key` has postings.
    #[must_use]
    pub fn contains_key(&self, storage_key: &StorageKey) -> bool {
        self.reverse.contains_key(storage_key)
    }

    /// Returns the raw values `storage_key` is posted under.
    pub fn values_of(&self, storage_key: &StorageKey) -> Vec<&Value> {
        self.reverse
            .get(storage_key)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|hash| self.forward.get(hash).map(|entry| &entry.value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterates over `(value, posting list)` pairs in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (&Value, &KeySet)> {
        self.forward.values().map(|entry| (&entry.value, &entry.keys))
    }

    /// Removes all postings.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Encodes the postings as a list of `[value, [storage_key, ...]]` pairs.
    #[must_use]
    pub fn to_pairs(&self) -> Value {
        let mut pairs: Vec<(&Value, &KeySet)> = self.entries().collect();
        pairs.sort_by(|a, b| a.0.sort_cmp(b.0));
        Value::Array(
            pairs
                .into_iter()
                .map(|(value, keys)| {
                    Value::Array(vec![
                        value.clone(),
                        Value::Array(
                            keys.iter()
                                .map(|k| Value::Text(k.as_str().to_string()))
                                .collect(),
                        ),
                    ])
                })
                .collect(),
        )
    }

    /// Rebuilds an index from the output of [`Index::to_pairs`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the pairs are malformed.
    pub fn from_pairs(key: impl Into<String>, pairs: &Value) -> CoreResult<Self> {
        let mut index = Self::new(key);
        let pairs = pairs
            .as_array()
            .ok_or_else(|| CoreError::invalid_format("index postings must be a sequence"))?;

        for pair in pairs {
            let (value, keys) = match pair.as_array() {
                Some([value, Value::Array(keys)]) => (value, keys),
                _ => {
                    return Err(CoreError::invalid_format(
                        "index posting must be a [value, keys] pair",
                    ))
                }
            };
            let hash = value.hash_key()?;
            let mut posted = KeySet::new();
            for key in keys {
                let key = key
                    .as_text()
                    .ok_or_else(|| CoreError::invalid_format("storage keys must be text"))?;
                let key = StorageKey::from(key);
                index
                    .reverse
                    .entry(key.clone())
                    .or_default()
                    .push(hash.clone());
                posted.insert(key);
            }
            if !posted.is_empty() {
                index.forward.insert(
                    hash,
                    PostingEntry {
                        value: value.clone(),
                        keys: posted,
                    },
                );
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: Vec<(&str, Value)>) -> Value {
        Value::map(pairs)
    }

    fn keys(names: &[&str]) -> KeySet {
        names.iter().map(|n| StorageKey::from(*n)).collect()
    }

    #[test]
    fn add_and_lookup() {
        let mut index = Index::new("year");
        index
            .add_key(&doc(vec![("year", Value::from(1972))]), &"a".into())
            .unwrap();
        index
            .add_key(&doc(vec![("year", Value::from(1974))]), &"b".into())
            .unwrap();

        assert_eq!(index.get_keys_for(&Value::from(1972)).unwrap(), keys(&["a"]));
        assert_eq!(index.get_all_keys(), keys(&["a", "b"]));
        assert!(index.get_keys_for(&Value::from(2000)).unwrap().is_empty());
    }

    #[test]
    fn add_key_replaces_prior_postings() {
        let mut index = Index::new("year");
        let key = StorageKey::from("a");
        index.add_key(&doc(vec![("year", Value::from(1972))]), &key).unwrap();
        index.add_key(&doc(vec![("year", Value::from(1990))]), &key).unwrap();

        assert!(index.get_keys_for(&Value::from(1972)).unwrap().is_empty());
        assert_eq!(index.get_keys_for(&Value::from(1990)).unwrap(), keys(&["a"]));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn missing_path_is_sparse() {
        let mut index = Index::new("director.name");
        let key = StorageKey::from("a");
        index
            .add_key(&doc(vec![("director", Value::empty_map())]), &key)
            .unwrap();
        assert!(index.is_empty());
        assert!(!index.contains_key(&key));

        index
            .add_key(
                &doc(vec![(
                    "director",
                    Value::map([("name", Value::from("Coppola"))]),
                )]),
                &key,
            )
            .unwrap();
        assert_eq!(
            index.get_keys_for(&Value::from("Coppola")).unwrap(),
            keys(&["a"])
        );
    }

    #[test]
    fn multikey_posts_elements_and_whole_list() {
        let mut index = Index::new("tags");
        let tags = Value::from(vec!["crime", "drama", "crime"]);
        index
            .add_key(&doc(vec![("tags", tags.clone())]), &"a".into())
            .unwrap();

        assert_eq!(index.get_keys_for(&Value::from("crime")).unwrap(), keys(&["a"]));
        assert_eq!(index.get_keys_for(&Value::from("drama")).unwrap(), keys(&["a"]));
        assert_eq!(index.get_keys_for(&tags).unwrap(), keys(&["a"]));
        assert_eq!(index.values_of(&"a".into()).len(), 3);
    }

    #[test]
    fn maps_hash_by_sorted_items() {
        let mut index = Index::new("meta");
        let a = Value::map([("x", Value::from(1)), ("y", Value::from(2))]);
        let b = Value::map([("y", Value::from(2)), ("x", Value::from(1))]);
        index.add_key(&doc(vec![("meta", a)]), &"a".into()).unwrap();
        assert_eq!(index.get_keys_for(&b).unwrap(), keys(&["a"]));
    }

    #[test]
    fn remove_key_clears_all_postings() {
        let mut index = Index::new("tags");
        index
            .add_key(&doc(vec![("tags", Value::from(vec!["x", "y"]))]), &"a".into())
            .unwrap();
        index
            .add_key(&doc(vec![("tags", Value::from(vec!["x"]))]), &"b".into())
            .unwrap();

        index.remove_key(&"a".into());
        assert_eq!(index.get_all_keys(), keys(&["b"]));
        assert!(index.get_keys_for(&Value::from("y")).unwrap().is_empty());
        assert_eq!(index.get_keys_for(&Value::from("x")).unwrap(), keys(&["b"]));

        index.remove_key(&"missing".into());
    }

    #[test]
    fn predicate_scan() {
        let mut index = Index::new("year");
        for (k, year) in [("a", 1924), ("b", 1940), ("c", 1972)] {
            index
                .add_key(&doc(vec![("year", Value::from(year))]), &k.into())
                .unwrap();
        }
        let found = index.get_keys_matching(|v| v.as_integer().is_some_and(|y| y >= 1930));
        assert_eq!(found, keys(&["b", "c"]));
    }

    #[test]
    fn pairs_roundtrip() {
        let mut index = Index::new("cast");
        index
            .add_key(
                &doc(vec![("cast", Value::from(vec!["Pacino", "Brando"]))]),
                &"a".into(),
            )
            .unwrap();
        index
            .add_key(&doc(vec![("cast", Value::from("Pacino"))]), &"b".into())
            .unwrap();

        let restored = Index::from_pairs("cast", &index.to_pairs()).unwrap();
        assert_eq!(
            restored.get_keys_for(&Value::from("Pacino")).unwrap(),
            keys(&["a", "b"])
        );
        assert_eq!(restored.get_all_keys(), index.get_all_keys());
        assert_eq!(restored.len(), index.len());
    }

    #[test]
    fn from_pairs_rejects_garbage() {
        assert!(Index::from_pairs("x", &Value::from(1)).is_err());
        assert!(Index::from_pairs("x", &Value::from(vec![Value::from(1)])).is_err());
    }
}
