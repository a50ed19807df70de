//! Authoritative document storage.
//!
//! The server writes every replicated change through a [`DocumentStore`].
//! Two backends ship: an in-memory store for development and tests, and a
//! PostgreSQL store keeping one JSONB row per document.

mod database;
mod memory;
mod pool;
mod postgres;

pub use database::Database;
pub use memory::MemoryDocumentStore;
pub use pool::*;
pub use postgres::PgDocumentStore;

use crate::error::Result;
use async_trait::async_trait;
use rtdb_engine::{FindOptions, Key};
use serde_json::Value;

/// A document store addressed by collection and key, queried with native
/// query objects.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Fails if the key is taken.
    async fn insert(&self, collection: &str, key: &Key, document: Value) -> Result<()>;

    /// Replace the document at `key`, inserting it when absent.
    async fn update(&self, collection: &str, key: &Key, document: Value) -> Result<()>;

    /// Remove the document at `key`. Returns whether it existed.
    async fn delete(&self, collection: &str, key: &Key) -> Result<bool>;

    /// Documents matching `options.query`, sorted and paged.
    async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Value>>;

    async fn count(&self, collection: &str, query: &Value) -> Result<usize>;
}

/// Apply sort, skip and limit to documents already filtered by a query.
pub(crate) fn page(mut documents: Vec<Value>, options: &FindOptions) -> Vec<Value> {
    if let Some(sort) = &options.sort {
        rtdb_engine::apply_document_sort(&mut documents, sort);
    }
    documents
        .into_iter()
        .skip(options.skip)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect()
}
