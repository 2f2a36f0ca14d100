//! Ordering storage keys by indexed values.

use crate::index::Index;
use crate::types::{SortOrder, StorageKey};
use shelfdb_codec::Value;
use std::cmp::Ordering;

/// Orders `keys` by the postings of each index in turn.
///
/// Keys are grouped by their value in the first index and the groups are
/// ordered; ties are broken by the remaining indexes. A multikey document
/// sorts by its smallest element ascending and its largest descending.
/// Documents without a value sort last ascending and first descending.
/// The relative order of keys that tie on every index is preserved.
pub(crate) fn sort_keys(keys: Vec<StorageKey>, order: &[(&Index, SortOrder)]) -> Vec<StorageKey> {
    let Some(((index, direction), rest)) = order.split_first() else {
        return keys;
    };

    let mut valued: Vec<(&Value, StorageKey)> = Vec::with_capacity(keys.len());
    let mut missing = Vec::new();
    for key in keys {
        match sort_value(index, &key, *direction) {
            Some(value) => valued.push((value, key)),
            None => missing.push(key),
        }
    }

    valued.sort_by(|(a, _), (b, _)| match direction {
        SortOrder::Ascending => a.sort_cmp(b),
        SortOrder::Descending => b.sort_cmp(a),
    });

    let mut sorted = Vec::new();
    if *direction == SortOrder::Descending {
        sorted.extend(sort_keys(missing, rest));
        missing = Vec::new();
    }

    let mut group: Vec<StorageKey> = Vec::new();
    let mut current: Option<&Value> = None;
    for (value, key) in valued {
        if current.is_some_and(|c| c.sort_cmp(value) != Ordering::Equal) {
            sorted.extend(sort_keys(std::mem::take(&mut group), rest));
        }
        current = Some(value);
        group.push(key);
    }
    sorted.extend(sort_keys(group, rest));
    sorted.extend(sort_keys(missing, rest));
    sorted
}

fn sort_value<'a>(index: &'a Index, key: &StorageKey, direction: SortOrder) -> Option<&'a Value> {
    let values = index.values_of(key);
    // A multikey posting also carries the whole array; sort by the elements.
    let has_elements = values.iter().any(|v| !matches!(v, Value::Array(_)));
    let candidates = values
        .into_iter()
        .filter(|v| !has_elements || !matches!(v, Value::Array(_)));
    match direction {
        SortOrder::Ascending => candidates.min_by(|a, b| a.sort_cmp(b)),
        SortOrder::Descending => candidates.max_by(|a, b| a.sort_cmp(b)),
    }
}
