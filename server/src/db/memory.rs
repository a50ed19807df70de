//! In-memory document store.

use super::{page, DocumentStore};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use rtdb_engine::{matches_document_query, FindOptions, Key};
use serde_json::Value;
use std::collections::BTreeMap;

/// Documents per collection, ordered by key.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: DashMap<String, BTreeMap<Key, Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    pub fn get(&self, collection: &str, key: &Key) -> Option<Value> {
        self.collections.get(collection)?.get(key).cloned()
    }

    fn matching(&self, collection: &str, query: &Value) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| matches_document_query(doc, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, collection: &str, key: &Key, document: Value) -> Result<()> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(key) {
            return Err(AppError::Conflict(format!("{collection}/{key}")));
        }
        docs.insert(key.clone(), document);
        Ok(())
    }

    async fn update(&self, collection: &str, key: &Key, document: Value) -> Result<()> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.clone(), document);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &Key) -> Result<bool> {
        Ok(self
            .collections
            .get_mut(collection)
            .is_some_and(|mut docs| docs.remove(key).is_some()))
    }

    async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Value>> {
        Ok(page(self.matching(collection, &options.query), options))
    }

    async fn count(&self, collection: &str, query: &Value) -> Result<usize> {
        Ok(self.matching(collection, query).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        for (id, age) in [("a", 40), ("b", 17), ("c", 25)] {
            store
                .insert("users", &Key::from(id), json!({"_id": id, "age": age}))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_rejects_existing_key() {
        let store = seeded().await;
        let err = store
            .insert("users", &Key::from("a"), json!({"_id": "a"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_upserts() {
        let store = seeded().await;
        store.update("users", &Key::from("a"), json!({"_id": "a", "age": 41})).await.unwrap();
        store.update("users", &Key::from("d"), json!({"_id": "d", "age": 9})).await.unwrap();
        assert_eq!(store.len("users"), 4);
        assert_eq!(store.get("users", &Key::from("a")), Some(json!({"_id": "a", "age": 41})));
    }

    #[tokio::test]
    async fn test_find_filters_sorts_and_pages() {
        let store = seeded().await;
        let options = FindOptions {
            query: json!({"age": {"$gte": 18}}),
            sort: Some(json!({"age": -1})),
            skip: 0,
            limit: Some(1),
        };
        let found = store.find("users", &options).await.unwrap();
        assert_eq!(found, vec![json!({"_id": "a", "age": 40})]);
        assert_eq!(store.count("users", &json!({"age": {"$gte": 18}})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = seeded().await;
        assert!(store.delete("users", &Key::from("b")).await.unwrap());
        assert!(!store.delete("users", &Key::from("b")).await.unwrap());
        assert!(!store.delete("missing", &Key::from("b")).await.unwrap());
    }
}
