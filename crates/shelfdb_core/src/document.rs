//! Documents: a collection name plus an attribute tree.

use crate::error::{CoreError, CoreResult};
use shelfdb_codec::Value;
use std::collections::BTreeMap;

/// A schemaless document.
///
/// Attributes are a [`Value::Map`]. The primary key is an ordinary
/// attribute whose name is set per collection (see
/// [`CollectionParams`](crate::CollectionParams)).
///
/// A document may be *unloaded*: a placeholder holding only its primary
/// key, as produced when resolving a [`Value::Ref`]. Reading other
/// attributes of an unloaded document requires
/// [`FileBackend::load`](crate::FileBackend::load) first.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    collection: String,
    attributes: Value,
    loaded: bool,
}

impl Document {
    /// Creates a loaded document from attribute pairs.
    pub fn new<K, I>(collection: impl Into<String>, attributes: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            collection: collection.into(),
            attributes: Value::map(attributes),
            loaded: true,
        }
    }

    /// Creates a loaded document from an attribute map.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `attributes` is not a map.
    pub fn from_value(collection: impl Into<String>, attributes: Value) -> CoreResult<Self> {
        if attributes.as_map().is_none() {
            return Err(CoreError::invalid_operation(
                "document attributes must be a map",
            ));
        }
        Ok(Self {
            collection: collection.into(),
            attributes,
            loaded: true,
        })
    }

    /// Creates an unloaded placeholder holding only its primary key.
    pub fn lazy(collection: impl Into<String>, pk_field: &str, pk: Value) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(pk_field.to_string(), pk);
        Self {
            collection: collection.into(),
            attributes: Value::Map(attributes),
            loaded: false,
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the attribute map.
    #[must_use]
    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    /// Consumes the document, returning its attribute map.
    #[must_use]
    pub fn into_attributes(self) -> Value {
        self.attributes
    }

    /// Returns false for a placeholder that has not been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Replaces all attributes and marks the document loaded.
    pub(crate) fn fill(&mut self, attributes: Value) {
        self.attributes = attributes;
        self.loaded = true;
    }

    /// Reads a dotted attribute path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.attributes.get_path(path)
    }

    /// Sets a dotted attribute path, creating intermediate maps.
    ///
    /// # Errors
    ///
    /// Returns an error if the path crosses a scalar.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> CoreResult<()> {
        Ok(self.attributes.set_path(path, value.into())?)
    }

    /// Removes a dotted attribute path, returning the old value.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.attributes.delete_path(path)
    }

    /// Returns a reference to this document for embedding in another.
    ///
    /// Returns `None` if the primary key is not set.
    #[must_use]
    pub fn reference(&self, pk_field: &str) -> Option<Value> {
        self.get(pk_field)
            .map(|pk| Value::reference(self.collection.clone(), pk.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_access() {
        let mut doc = Document::new("movie", [("title", Value::from("Heat"))]);
        doc.set("director.name", "Michael Mann").unwrap();
        assert_eq!(doc.get("director.name"), Some(&Value::from("Michael Mann")));
        assert_eq!(doc.remove("director.name"), Some(Value::from("Michael Mann")));
        assert_eq!(doc.get("director.name"), None);
        assert!(doc.set("title.sub", 1).is_err());
    }

    #[test]
    fn lazy_documents_hold_only_pk() {
        let doc = Document::lazy("person", "pk", Value::from("mann"));
        assert!(!doc.is_loaded());
        assert_eq!(doc.get("pk"), Some(&Value::from("mann")));
        assert_eq!(doc.attributes().as_map().unwrap().len(), 1);
    }

    #[test]
    fn reference_needs_pk() {
        let mut doc = Document::new("person", [("name", Value::from("Mann"))]);
        assert!(doc.reference("pk").is_none());
        doc.set("pk", "mann").unwrap();
        assert_eq!(
            doc.reference("pk"),
            Some(Value::reference("person", "mann"))
        );
    }

    #[test]
    fn from_value_requires_map() {
        assert!(Document::from_value("x", Value::from(1)).is_err());
        assert!(Document::from_value("x", Value::empty_map()).is_ok());
    }
}
