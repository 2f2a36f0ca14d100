//! Naive query evaluation for cross-checking the index engine.
//!
//! [`matches`] decides a compiled [`Expr`] against one document by reading
//! its attributes directly. No index is involved, so agreement with
//! [`Expr::evaluate`] over a backend is a meaningful check.

use shelfdb_codec::Value;
use shelfdb_core::query::{Expr, RangeOp};

/// Values a field contributes to matching: the value itself and, for a
/// sequence, each of its elements.
fn candidates<'a>(document: &'a Value, field: &str) -> Vec<&'a Value> {
    match document.get_path(field) {
        None => Vec::new(),
        Some(value @ Value::Array(items)) => items.iter().chain([value]).collect(),
        Some(value) => vec![value],
    }
}

/// Index equality: identical canonical encodings.
fn same(a: &Value, b: &Value) -> bool {
    match (a.hash_key(), b.hash_key()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Returns true if `document` satisfies `expr`.
pub fn matches(expr: &Expr, document: &Value) -> bool {
    match expr {
        Expr::Equality { field, value } => candidates(document, field)
            .into_iter()
            .any(|c| same(c, value)),
        Expr::And(children) => children.iter().all(|child| matches(child, document)),
        Expr::Or(children) => children.iter().any(|child| matches(child, document)),
        Expr::Not(child) => !matches(child, document),
        Expr::Range {
            field,
            op: RangeOp::Ne,
            bound,
        } => {
            let values = candidates(document, field);
            !values.is_empty() && !values.into_iter().any(|c| same(c, bound))
        }
        Expr::Range { field, op, bound } => candidates(document, field)
            .into_iter()
            .any(|c| op.accepts(c, bound)),
        Expr::In { field, values } => candidates(document, field)
            .into_iter()
            .any(|c| values.iter().any(|v| same(c, v))),
        Expr::All { field, values } => {
            let present = candidates(document, field);
            !values.is_empty() && values.iter().all(|v| present.iter().any(|c| same(c, v)))
        }
        Expr::Exists { field, present } => document.get_path(field).is_some() == *present,
        Expr::Regex { field, pattern } => candidates(document, field)
            .into_iter()
            .any(|c| c.as_text().is_some_and(|text| pattern.is_match(text))),
    }
}

/// Returns the primary keys of the documents satisfying `expr`, sorted.
pub fn naive_filter(expr: &Expr, documents: &[Value], pk_field: &str) -> Vec<Value> {
    let mut pks: Vec<Value> = documents
        .iter()
        .filter(|doc| matches(expr, doc))
        .filter_map(|doc| doc.get_path(pk_field).cloned())
        .collect();
    pks.sort_by(Value::sort_cmp);
    pks
}
