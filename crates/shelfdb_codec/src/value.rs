//! Dynamic attribute value type.

use crate::encoder::to_canonical_cbor;
use crate::error::{CodecError, CodecResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Key naming the target collection in a reference stub.
pub const REF_COLLECTION_KEY: &str = "__collection__";

/// Key naming the target primary key in a reference stub.
pub const REF_PK_KEY: &str = "pk";

/// A dynamic attribute value.
///
/// Documents are `Value::Map`s whose leaves are scalars, sequences and
/// nested maps. `Ref` points at another document by collection and
/// primary key; on the wire it is the stub map
/// `{"__collection__": <collection>, "pk": <pk>}` and both serializers
/// turn such a stub back into a `Ref`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Double-precision float.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Sequence of values.
    Array(Vec<Value>),
    /// Map with text keys, kept sorted.
    Map(BTreeMap<String, Value>),
    /// Reference to a document in another collection.
    Ref {
        /// Collection of the referenced document.
        collection: String,
        /// Primary key of the referenced document.
        pk: Box<Value>,
    },
}

impl Value {
    /// Creates a map value from key/value pairs.
    pub fn map<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates an empty map value.
    #[must_use]
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Creates a reference to the document `pk` in `collection`.
    pub fn reference(collection: impl Into<String>, pk: impl Into<Value>) -> Self {
        Value::Ref {
            collection: collection.into(),
            pk: Box::new(pk.into()),
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, widening integers.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get the target of a reference, if this is one.
    pub fn as_reference(&self) -> Option<(&str, &Value)> {
        match self {
            Value::Ref { collection, pk } => Some((collection, pk)),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            Value::Ref { pk, .. } if key == REF_PK_KEY => Some(pk),
            _ => None,
        }
    }

    /// Resolves a dotted path such as `"director.name"` or `"cast.0"`.
    ///
    /// Map segments index by key, sequence segments by decimal position.
    /// Returns `None` as soon as a segment is absent or out of range.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                other => other.get(segment)?,
            };
        }
        Some(current)
    }

    /// Sets the value at a dotted path, creating intermediate maps.
    ///
    /// A sequence segment may address an existing element or the position
    /// just past the end, which appends.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPath`] if the path is empty, crosses a
    /// scalar, or indexes a sequence out of range.
    pub fn set_path(&mut self, path: &str, value: Value) -> CodecResult<()> {
        let segments = split_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(CodecError::invalid_path(path, "empty path"));
        };

        let mut current = self;
        for segment in parents {
            current = match current {
                Value::Map(map) => map
                    .entry((*segment).to_string())
                    .or_insert_with(Value::empty_map),
                Value::Array(items) => {
                    let idx = parse_index(path, segment)?;
                    items
                        .get_mut(idx)
                        .ok_or_else(|| CodecError::invalid_path(path, "index out of range"))?
                }
                _ => {
                    return Err(CodecError::invalid_path(
                        path,
                        format!("segment {segment:?} is not a container"),
                    ))
                }
            };
        }

        match current {
            Value::Map(map) => {
                map.insert((*last).to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let idx = parse_index(path, last)?;
                match idx.cmp(&items.len()) {
                    Ordering::Less => items[idx] = value,
                    Ordering::Equal => items.push(value),
                    Ordering::Greater => {
                        return Err(CodecError::invalid_path(path, "index out of range"))
                    }
                }
                Ok(())
            }
            _ => Err(CodecError::invalid_path(path, "parent is not a container")),
        }
    }

    /// Removes and returns the value at a dotted path, if present.
    pub fn delete_path(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments.split_last()?;

        let mut current = self;
        for segment in parents {
            current = match current {
                Value::Map(map) => map.get_mut(*segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        match current {
            Value::Map(map) => map.remove(*last),
            Value::Array(items) => {
                let idx = last.parse::<usize>().ok()?;
                (idx < items.len()).then(|| items.remove(idx))
            }
            _ => None,
        }
    }

    /// Returns the hashable form of this value: its canonical CBOR bytes.
    ///
    /// Equal values (including maps built in different insertion orders)
    /// produce identical keys. References hash like their stub maps.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NaNForbidden`] if the value contains NaN.
    pub fn hash_key(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }

    /// Converts references into their stub maps, recursively.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Value::Ref { collection, pk } => Value::map([
                (REF_COLLECTION_KEY, Value::Text(collection.clone())),
                (REF_PK_KEY, (**pk).clone()),
            ]),
            Value::Array(items) => Value::Array(items.iter().map(Value::to_wire).collect()),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_wire()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Converts reference stub maps back into references, recursively.
    #[must_use]
    pub fn from_wire(self) -> Value {
        match self {
            Value::Map(map) => {
                let map: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, v.from_wire())).collect();
                match stub_target(&map) {
                    Some((collection, pk)) => Value::Ref {
                        collection,
                        pk: Box::new(pk),
                    },
                    None => Value::Map(map),
                }
            }
            Value::Array(items) => Value::Array(items.into_iter().map(Value::from_wire).collect()),
            other => other,
        }
    }

    /// Rank of this value's kind in the cross-kind sort order.
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Map(_) | Value::Ref { .. } => 3,
            Value::Array(_) => 4,
            Value::Bytes(_) => 5,
            Value::Bool(_) => 6,
        }
    }

    /// Compares two scalars of the same kind.
    ///
    /// Integers and floats compare numerically with each other. Returns
    /// `None` for different kinds, containers, and NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_float()?.partial_cmp(&other.as_float()?)
            }
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order over all values, used for sorting result sets.
    ///
    /// Kinds order as null, numbers, text, maps, arrays, bytes, booleans;
    /// within a kind values compare naturally.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let rank = self.kind_rank().cmp(&other.kind_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        if let Some(ord) = self.compare(other) {
            return ord;
        }

        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(_) | Value::Ref { .. }, Value::Map(_) | Value::Ref { .. }) => {
                let (a, b) = (self.to_wire(), other.to_wire());
                let (Some(a), Some(b)) = (a.as_map(), b.as_map()) else {
                    return Ordering::Equal;
                };
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    let ord = ka.cmp(kb).then_with(|| va.sort_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => Ordering::Equal,
            },
        }
    }
}

fn split_path(path: &str) -> CodecResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CodecError::invalid_path(path, "empty segment"));
    }
    Ok(segments)
}

fn parse_index(path: &str, segment: &str) -> CodecResult<usize> {
    segment.parse::<usize>().map_err(|_| {
        CodecError::invalid_path(path, format!("segment {segment:?} is not a sequence index"))
    })
}

/// Returns the target of a reference stub map.
pub(crate) fn stub_target(map: &BTreeMap<String, Value>) -> Option<(String, Value)> {
    if map.len() != 2 {
        return None;
    }
    let collection = map.get(REF_COLLECTION_KEY)?.as_text()?;
    let pk = map.get(REF_PK_KEY)?;
    Some((collection.to_string(), pk.clone()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie() -> Value {
        Value::map([
            ("title", Value::from("The Godfather")),
            (
                "director",
                Value::map([("name", Value::from("Francis Coppola"))]),
            ),
            ("cast", Value::from(vec!["Marlon Brando", "Al Pacino"])),
        ])
    }

    #[test]
    fn get_path_walks_maps_and_sequences() {
        let doc = movie();
        assert_eq!(
            doc.get_path("director.name"),
            Some(&Value::from("Francis Coppola"))
        );
        assert_eq!(doc.get_path("cast.1"), Some(&Value::from("Al Pacino")));
        assert_eq!(doc.get_path("cast.5"), None);
        assert_eq!(doc.get_path("cast.x"), None);
        assert_eq!(doc.get_path("director.age"), None);
        assert_eq!(doc.get_path("title.length"), None);
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut doc = movie();
        doc.set_path("studio.name", Value::from("Paramount"))
            .unwrap();
        assert_eq!(doc.get_path("studio.name"), Some(&Value::from("Paramount")));

        doc.set_path("cast.2", Value::from("James Caan")).unwrap();
        assert_eq!(doc.get_path("cast.2"), Some(&Value::from("James Caan")));
    }

    #[test]
    fn set_path_rejects_bad_paths() {
        let mut doc = movie();
        assert!(doc.set_path("title.sub", Value::Null).is_err());
        assert!(doc.set_path("cast.9", Value::Null).is_err());
        assert!(doc.set_path("a..b", Value::Null).is_err());
    }

    #[test]
    fn delete_path_removes() {
        let mut doc = movie();
        assert_eq!(
            doc.delete_path("director.name"),
            Some(Value::from("Francis Coppola"))
        );
        assert_eq!(doc.get_path("director.name"), None);
        assert_eq!(doc.delete_path("cast.0"), Some(Value::from("Marlon Brando")));
        assert_eq!(doc.delete_path("nope.deeper"), None);
    }

    #[test]
    fn hash_key_ignores_insertion_order() {
        let a = Value::map([("x", Value::from(1)), ("y", Value::from(2))]);
        let b = Value::map([("y", Value::from(2)), ("x", Value::from(1))]);
        assert_eq!(a.hash_key().unwrap(), b.hash_key().unwrap());
        assert_ne!(
            Value::from(1).hash_key().unwrap(),
            Value::from("1").hash_key().unwrap()
        );
    }

    #[test]
    fn reference_wire_roundtrip() {
        let doc = Value::map([("director", Value::reference("person", "abc"))]);
        let wire = doc.to_wire();
        assert_eq!(
            wire.get_path("director.__collection__"),
            Some(&Value::from("person"))
        );
        assert_eq!(wire.from_wire(), doc);
    }

    #[test]
    fn reference_hashes_like_stub() {
        let reference = Value::reference("person", "abc");
        assert_eq!(
            reference.hash_key().unwrap(),
            reference.to_wire().hash_key().unwrap()
        );
    }

    #[test]
    fn compare_numbers_across_kinds() {
        assert_eq!(
            Value::from(2).compare(&Value::from(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::from("a").compare(&Value::from(1)), None);
        assert_eq!(Value::from(vec![1]).compare(&Value::from(vec![1])), None);
    }

    #[test]
    fn sort_cmp_orders_kinds() {
        let mut values = vec![
            Value::Bool(true),
            Value::from("b"),
            Value::from(3),
            Value::Null,
            Value::from("a"),
            Value::from(1.5),
        ];
        values.sort_by(Value::sort_cmp);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::from(1.5),
                Value::from(3),
                Value::from("a"),
                Value::from("b"),
                Value::Bool(true),
            ]
        );
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from(2.5), Value::Float(2.5));
        assert_eq!(Value::from(vec![1u8, 2, 3]), Value::Bytes(vec![1, 2, 3]));
        assert_eq!(Value::from(()), Value::Null);
    }
}
