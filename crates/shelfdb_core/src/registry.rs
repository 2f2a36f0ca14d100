//! Document type registry.

use std::collections::BTreeMap;

/// Attribute name holding the primary key unless overridden.
pub const DEFAULT_PK_FIELD: &str = "pk";

/// How a document type is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionParams {
    /// Collection name (directory under the database path).
    pub collection: String,
    /// Attribute holding the primary key.
    pub pk_field: String,
}

impl CollectionParams {
    /// Parameters for `collection` with the default primary-key field.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            pk_field: DEFAULT_PK_FIELD.to_string(),
        }
    }

    /// Overrides the primary-key field.
    #[must_use]
    pub fn pk_field(mut self, field: impl Into<String>) -> Self {
        self.pk_field = field.into();
        self
    }
}

/// Maps document type names to collections.
///
/// Each backend owns its registry. Names passed to backend operations are
/// looked up as type names first, then as collection names.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: BTreeMap<String, CollectionParams>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type name. A later registration replaces an earlier one.
    pub fn register(&mut self, type_name: impl Into<String>, params: CollectionParams) {
        self.types.insert(type_name.into(), params);
    }

    /// Resolves a type or collection name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&CollectionParams> {
        self.types
            .get(name)
            .or_else(|| self.types.values().find(|p| p.collection == name))
    }

    /// Returns the registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
