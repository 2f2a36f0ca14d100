//! Query evaluation against indexes.

use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use crate::query::expr::{Expr, RangeOp};
use crate::types::KeySet;

/// Supplies the indexes a compiled query is evaluated against.
pub trait Resolver {
    /// Returns the live index for a field path.
    ///
    /// # Errors
    ///
    /// Returns an error if no index exists for the field.
    fn index(&self, field: &str) -> CoreResult<&Index>;

    /// Returns every storage key of the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be produced.
    fn all_keys(&self) -> CoreResult<KeySet>;
}

impl Expr {
    /// Evaluates the query to the set of matching storage keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver lacks an index for a referenced
    /// field or a value cannot be hashed.
    pub fn evaluate(&self, resolver: &dyn Resolver) -> CoreResult<KeySet> {
        match self {
            Expr::Equality { field, value } => resolver.index(field)?.get_keys_for(value),
            Expr::And(children) => {
                let Some((first, rest)) = children.split_first() else {
                    return resolver.all_keys();
                };
                let mut keys = first.evaluate(resolver)?;
                for child in rest {
                    if keys.is_empty() {
                        break;
                    }
                    let other = child.evaluate(resolver)?;
                    keys.retain(|k| other.contains(k));
                }
                Ok(keys)
            }
            Expr::Or(children) => {
                let mut keys = KeySet::new();
                for child in children {
                    keys.extend(child.evaluate(resolver)?);
                }
                Ok(keys)
            }
            Expr::Not(child) => {
                let excluded = child.evaluate(resolver)?;
                let mut keys = resolver.all_keys()?;
                keys.retain(|k| !excluded.contains(k));
                Ok(keys)
            }
            Expr::Range {
                field,
                op: RangeOp::Ne,
                bound,
            } => {
                let index = resolver.index(field)?;
                let equal = index.get_keys_for(bound)?;
                let mut keys = index.get_all_keys();
                keys.retain(|k| !equal.contains(k));
                Ok(keys)
            }
            Expr::Range { field, op, bound } => Ok(resolver
                .index(field)?
                .get_keys_matching(|value| op.accepts(value, bound))),
            Expr::In { field, values } => {
                let index = resolver.index(field)?;
                let mut keys = KeySet::new();
                for value in values {
                    keys.extend(index.get_keys_for(value)?);
                }
                Ok(keys)
            }
            Expr::All { field, values } => {
                let index = resolver.index(field)?;
                let Some((first, rest)) = values.split_first() else {
                    return Ok(KeySet::new());
                };
                let mut keys = index.get_keys_for(first)?;
                for value in rest {
                    let other = index.get_keys_for(value)?;
                    keys.retain(|k| other.contains(k));
                }
                Ok(keys)
            }
            Expr::Exists { field, present } => {
                let posted = resolver.index(field)?.get_all_keys();
                if *present {
                    return Ok(posted);
                }
                let mut keys = resolver.all_keys()?;
                keys.retain(|k| !posted.contains(k));
                Ok(keys)
            }
            Expr::Regex { field, pattern } => Ok(resolver.index(field)?.get_keys_matching(
                |value| value.as_text().is_some_and(|text| pattern.is_match(text)),
            )),
        }
    }
}

/// A resolver over a fixed set of indexes, keyed by field.
///
/// The first index supplies the collection's full key set, so it should be
/// the primary-key index.
pub struct IndexResolver<'a> {
    indexes: Vec<&'a Index>,
}

impl<'a> IndexResolver<'a> {
    /// Creates a resolver; `primary` supplies the full key set.
    pub fn new(primary: &'a Index, others: impl IntoIterator<Item = &'a Index>) -> Self {
        let mut indexes = vec![primary];
        indexes.extend(others);
        Self { indexes }
    }
}

impl Resolver for IndexResolver<'_> {
    fn index(&self, field: &str) -> CoreResult<&Index> {
        self.indexes
            .iter()
            .find(|index| index.key() == field)
            .copied()
            .ok_or_else(|| CoreError::invalid_operation(format!("no index on field {field:?}")))
    }

    fn all_keys(&self) -> CoreResult<KeySet> {
        Ok(self.indexes[0].get_all_keys())
    }
}
