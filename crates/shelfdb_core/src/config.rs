//! Database configuration.
//!
//! The persisted part of [`Config`] lives in `<path>/config.json`. It is
//! written on first open and rewritten whenever a persistent index is
//! declared. The open options (`create_if_missing`, `overwrite_config`)
//! only steer [`crate::FileBackend::open_with_config`] and are never stored.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use shelfdb_codec::SerializerKind;
use shelfdb_storage::DEFAULT_FAN_OUT;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File name of the configuration inside a database directory.
pub const CONFIG_FILE: &str = "config.json";

/// Configuration format version written by this build.
pub const FORMAT_VERSION: (u16, u16) = (1, 0);

/// Which blob store holds collection objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// One file per document.
    #[default]
    File,
    /// Documents packed into a bounded number of pack files.
    Compacting,
}

/// A declared index, as persisted in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Directory name under `<collection>/indexes/`.
    pub id: String,
    /// Dotted attribute path.
    pub key: String,
    /// Whether duplicate values are rejected at commit.
    #[serde(default)]
    pub unique: bool,
    /// Whether this is the collection's primary-key index.
    #[serde(default)]
    pub primary: bool,
}

/// Configuration for opening a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Format version of the on-disk layout.
    pub format_version: (u16, u16),

    /// Document and index serializer.
    pub serializer: SerializerKind,

    /// Object store variant.
    pub store: StoreKind,

    /// Entries per pack file for the compacting store.
    pub pack_fan_out: usize,

    /// Whether every save and delete commits immediately.
    pub autocommit: bool,

    /// Index definitions: collection, then field.
    #[serde(default)]
    pub indexes: BTreeMap<String, BTreeMap<String, IndexDefinition>>,

    /// Whether to create the database if it doesn't exist.
    #[serde(skip, default = "default_true")]
    pub create_if_missing: bool,

    /// Whether the supplied values replace an existing `config.json`.
    #[serde(skip)]
    pub overwrite_config: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            serializer: SerializerKind::Json,
            store: StoreKind::File,
            pack_fan_out: DEFAULT_FAN_OUT,
            autocommit: false,
            indexes: BTreeMap::new(),
            create_if_missing: true,
            overwrite_config: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the serializer used for documents and indexes.
    #[must_use]
    pub const fn serializer(mut self, kind: SerializerKind) -> Self {
        self.serializer = kind;
        self
    }

    /// Sets the object store variant.
    #[must_use]
    pub const fn store(mut self, kind: StoreKind) -> Self {
        self.store = kind;
        self
    }

    /// Sets the number of entries per pack file.
    #[must_use]
    pub const fn pack_fan_out(mut self, fan_out: usize) -> Self {
        self.pack_fan_out = fan_out;
        self
    }

    /// Sets whether every save and delete commits immediately.
    #[must_use]
    pub const fn autocommit(mut self, value: bool) -> Self {
        self.autocommit = value;
        self
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether the supplied values replace an existing configuration.
    #[must_use]
    pub const fn overwrite_config(mut self, value: bool) -> Self {
        self.overwrite_config = value;
        self
    }

    /// Returns the index definitions of a collection.
    #[must_use]
    pub fn indexes_for(&self, collection: &str) -> Option<&BTreeMap<String, IndexDefinition>> {
        self.indexes.get(collection)
    }

    /// Records an index definition, replacing any for the same field.
    pub fn add_index(&mut self, collection: &str, definition: IndexDefinition) {
        self.indexes
            .entry(collection.to_string())
            .or_default()
            .insert(definition.key.clone(), definition);
    }

    /// Loads the configuration stored in a database directory.
    ///
    /// Returns `Ok(None)` if the directory holds no configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or its major
    /// format version differs from [`FORMAT_VERSION`].
    pub fn load(dir: &Path) -> CoreResult<Option<Self>> {
        let path = dir.join(CONFIG_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: Config = serde_json::from_str(&text)?;
        if config.format_version.0 != FORMAT_VERSION.0 {
            return Err(CoreError::invalid_format(format!(
                "incompatible format version: database is v{}.{}, expected v{}.{}",
                config.format_version.0,
                config.format_version.1,
                FORMAT_VERSION.0,
                FORMAT_VERSION.1
            )));
        }
        Ok(Some(config))
    }

    /// Writes the configuration into a database directory.
    ///
    /// The file is replaced atomically via a temporary file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, dir: &Path) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = dir.join(format!(".{CONFIG_FILE}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(CONFIG_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.overwrite_config);
        assert!(!config.autocommit);
        assert_eq!(config.serializer, SerializerKind::Json);
        assert_eq!(config.pack_fan_out, DEFAULT_FAN_OUT);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .serializer(SerializerKind::Cbor)
            .store(StoreKind::Compacting)
            .pack_fan_out(4)
            .autocommit(true)
            .create_if_missing(false);

        assert_eq!(config.serializer, SerializerKind::Cbor);
        assert_eq!(config.store, StoreKind::Compacting);
        assert_eq!(config.pack_fan_out, 4);
        assert!(config.autocommit);
        assert!(!config.create_if_missing);
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = Config::new().serializer(SerializerKind::Cbor);
        config.add_index(
            "movie",
            IndexDefinition {
                id: "abc".into(),
                key: "year".into(),
                unique: false,
                primary: false,
            },
        );
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.indexes_for("movie").unwrap()["year"].id, "abc");
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempdir().unwrap();
        assert!(Config::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn major_version_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let mut config = Config::new();
        config.format_version = (FORMAT_VERSION.0 + 1, 0);
        config.save(dir.path()).unwrap();

        assert!(matches!(
            Config::load(dir.path()),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn persisted_json_uses_lowercase_names() {
        let dir = tempdir().unwrap();
        Config::new()
            .store(StoreKind::Compacting)
            .save(dir.path())
            .unwrap();
        let text = fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(text.contains("\"compacting\""));
        assert!(text.contains("\"json\""));
        assert!(!text.contains("create_if_missing"));
    }
}
