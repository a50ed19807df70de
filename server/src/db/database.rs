//! One served database: its schema and the store holding its documents.

use super::DocumentStore;
use crate::error::{AppError, Result};
use rtdb_engine::{CollectionSchema, DbSchema, EventKind, Key, Query, RecordChange};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct Database {
    schema: DbSchema,
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.schema.name).finish()
    }
}

impl Database {
    pub fn new(schema: DbSchema, store: Arc<dyn DocumentStore>) -> Self {
        Self { schema, store }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &DbSchema {
        &self.schema
    }

    fn collection(&self, name: &str) -> Result<&CollectionSchema> {
        self.schema
            .get_collection(name)
            .ok_or_else(|| AppError::NotFound(format!("collection {}/{name}", self.schema.name)))
    }

    /// Storage name of a collection, unique across databases.
    fn table(&self, collection: &str) -> String {
        format!("{}/{collection}", self.schema.name)
    }

    /// Write a replicated change to the store.
    ///
    /// Documents without a key get a generated one, written into the
    /// document at the collection's key path.
    pub async fn apply(&self, kind: EventKind, change: &RecordChange) -> Result<Key> {
        let collection = self.collection(&change.collection)?;
        let key_path = collection.document_key_path();
        let table = self.table(&change.collection);

        if kind == EventKind::Deleted {
            let key = change
                .key
                .clone()
                .or_else(|| change.record.as_ref().and_then(|r| key_path.extract(r)))
                .ok_or_else(|| AppError::BadRequest(format!("delete in {table} without a key")))?;
            if !self.store.delete(&table, &key).await? {
                tracing::debug!(collection = %table, key = %key, "Deleted document was absent");
            }
            return Ok(key);
        }

        let mut document = change
            .record
            .clone()
            .ok_or_else(|| AppError::BadRequest(format!("{kind:?} in {table} without a record")))?;
        let key = match change.key.clone().or_else(|| key_path.extract(&document)) {
            Some(key) => key,
            None => {
                let key = Key::Text(uuid::Uuid::new_v4().to_string());
                key_path.inject(&mut document, &key);
                key
            }
        };

        match kind {
            EventKind::Added => self.store.insert(&table, &key, document).await?,
            _ => self.store.update(&table, &key, document).await?,
        }
        Ok(key)
    }

    /// Run a query through the store's native query language.
    pub async fn find(&self, query: &Query) -> Result<Vec<Value>> {
        self.collection(&query.collection)?;
        let options = query.to_find_options()?;
        self.store.find(&self.table(&query.collection), &options).await
    }

    pub async fn count(&self, collection: &str) -> Result<usize> {
        self.collection(collection)?;
        self.store.count(&self.table(collection), &serde_json::json!({})).await
    }

    /// The key a stored document is addressed by.
    pub fn key_of(&self, collection: &str, document: &Value) -> Option<Key> {
        self.collection(collection)
            .ok()
            .and_then(|schema| schema.document_key_path().extract(document))
    }
}
