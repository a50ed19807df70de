//! Local object store port.
//!
//! A replica keeps one [`LocalStore`] per replicated collection. Records
//! are JSON values ordered by [`Key`]; keys come from the collection's key
//! path, from the caller, or from the store's key generator.

use crate::error::Result;
use crate::schema::CollectionSchema;
use crate::{Key, KeyRange};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Record visitor for [`LocalStore::for_each`]. Return `false` to stop.
pub type Visitor<'a> = dyn FnMut(&Key, &Value) -> bool + Send + 'a;

/// An embedded, key-ordered object store holding one collection.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Schema the store was opened with.
    fn schema(&self) -> &CollectionSchema;

    /// Insert a new record. Fails if the key is taken.
    ///
    /// `key` is required for collections without a key path or key
    /// generator and ignored otherwise.
    async fn add(&self, record: Value, key: Option<Key>) -> Result<Key>;

    /// Insert or replace a record.
    async fn put(&self, record: Value, key: Option<Key>) -> Result<Key>;

    /// Remove a record. Deleting a missing key is not an error.
    async fn delete(&self, key: &Key) -> Result<()>;

    async fn get(&self, key: &Key) -> Result<Option<Value>>;

    /// Every record in `range` (all records when `None`), in key order.
    async fn get_all(&self, range: Option<&KeyRange>) -> Result<Vec<Value>>;

    async fn count(&self, range: Option<&KeyRange>) -> Result<usize>;

    /// Visit records in key order until the visitor returns `false`.
    async fn for_each(&self, range: Option<&KeyRange>, visit: &mut Visitor<'_>) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Opens local stores for replicated collections.
#[async_trait]
pub trait LocalStoreFactory: Send + Sync {
    /// Open the store for `schema` in database `db`.
    ///
    /// Reopening a collection with an unchanged schema keeps its records.
    async fn open(&self, db: &str, schema: &CollectionSchema) -> Result<Arc<dyn LocalStore>>;
}
