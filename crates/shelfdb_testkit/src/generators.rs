//! Property-based test generators using proptest.
//!
//! Documents and queries draw from a small shared vocabulary of fields and
//! values so that generated queries actually hit generated documents.

use proptest::prelude::*;
use shelfdb_codec::Value;

/// Field paths used by [`document_strategy`] and [`query_strategy`].
pub const FIELDS: &[&str] = &["a", "b", "tags", "meta.rank"];

/// Strategy for small scalar values, mixing kinds.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => (0i64..4).prop_map(Value::from),
        3 => prop::sample::select(vec!["x", "y", "z"]).prop_map(Value::from),
        1 => Just(Value::Null),
        1 => any::<bool>().prop_map(Value::from),
    ]
}

/// Strategy for documents over [`FIELDS`], each field optional.
///
/// `tags` is always a sequence when present.
pub fn document_strategy() -> impl Strategy<Value = Value> {
    (
        prop::option::of(scalar_strategy()),
        prop::option::of(scalar_strategy()),
        prop::option::of(prop::collection::vec(scalar_strategy(), 0..4)),
        prop::option::of(scalar_strategy()),
    )
        .prop_map(|(a, b, tags, rank)| {
            let mut doc = Value::empty_map();
            let fields = [
                ("a", a),
                ("b", b),
                ("tags", tags.map(Value::Array)),
                ("meta.rank", rank),
            ];
            for (path, value) in fields {
                if let Some(value) = value {
                    doc.set_path(path, value).expect("Failed to set path");
                }
            }
            doc
        })
}

/// Strategy for a batch of documents.
pub fn documents_strategy(max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(document_strategy(), 0..max)
}

fn field_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(FIELDS)
}

fn operator(field: &str, op: &str, operand: Value) -> Value {
    Value::map([(field, Value::map([(op, operand)]))])
}

fn leaf_query_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (field_strategy(), scalar_strategy()).prop_map(|(f, v)| Value::map([(f, v)])),
        (field_strategy(), prop::collection::vec(scalar_strategy(), 0..3))
            .prop_map(|(f, vs)| operator(f, "$in", Value::Array(vs))),
        (field_strategy(), prop::collection::vec(scalar_strategy(), 0..3))
            .prop_map(|(f, vs)| operator(f, "$all", Value::Array(vs))),
    ]
}

/// Strategy for queries built from equality, `$in` and `$all` combined
/// with `$and`, `$or` and `$not`.
pub fn query_strategy() -> impl Strategy<Value = Value> {
    leaf_query_strategy().prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3)
                .prop_map(|qs| Value::map([("$and", Value::Array(qs))])),
            prop::collection::vec(inner.clone(), 0..3)
                .prop_map(|qs| Value::map([("$or", Value::Array(qs))])),
            inner.prop_map(|q| Value::map([("$not", q)])),
        ]
    })
}

/// Strategy for single-field range and presence queries over `a`.
pub fn range_query_strategy() -> impl Strategy<Value = Value> {
    let op = prop::sample::select(vec!["$gt", "$gte", "$lt", "$lte", "$ne"]);
    prop_oneof![
        (op, scalar_strategy()).prop_map(|(op, bound)| operator("a", op, bound)),
        any::<bool>().prop_map(|present| operator("a", "$exists", Value::from(present))),
    ]
}
