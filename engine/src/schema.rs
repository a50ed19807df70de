//! Schema definitions replicated from the server to clients.
//!
//! A database schema lists its collections; each collection says how a
//! record's identity is derived (key path and auto-increment) and which
//! secondary indexes the local store should build.

use crate::{CollectionName, DbName, Key, KeyPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key path used when a collection does not declare one.
pub const DEFAULT_KEY_PATH: &str = "_id";

/// Schema of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    /// Index name
    pub name: String,
    /// Field path(s) the index is built on
    pub key_path: KeyPath,
    /// Whether indexed values must be unique
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
}

impl IndexSchema {
    /// Create a non-unique index.
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Builder-style method to mark the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name
    pub name: CollectionName,
    /// Where record keys live; out-of-line keys when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<KeyPath>,
    /// Whether the store generates keys for records that lack one
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_increment: bool,
    /// Secondary indexes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSchema>,
}

impl CollectionSchema {
    /// Create a collection schema with out-of-line keys.
    pub fn new(name: impl Into<CollectionName>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Builder-style method to set the key path.
    pub fn with_key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Builder-style method to enable key generation.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Builder-style method to add an index.
    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Extract a record's key using the declared key path.
    pub fn key_of(&self, record: &Value) -> Option<Key> {
        self.key_path.as_ref().and_then(|path| path.extract(record))
    }

    /// Key path the document backend uses for this collection.
    pub fn document_key_path(&self) -> KeyPath {
        self.key_path
            .clone()
            .unwrap_or_else(|| KeyPath::from(DEFAULT_KEY_PATH))
    }
}

/// Schema of a whole database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSchema {
    /// Database name
    pub name: DbName,
    /// Schema version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Collections in declaration order
    pub collections: Vec<CollectionSchema>,
}

impl DbSchema {
    /// Create an empty database schema.
    pub fn new(name: impl Into<DbName>) -> Self {
        Self {
            name: name.into(),
            version: None,
            collections: Vec::new(),
        }
    }

    /// Builder-style method to set the version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Add a collection, replacing any previous one with the same name.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.retain(|c| c.name != collection.name);
        self.collections.push(collection);
        self
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }
}
