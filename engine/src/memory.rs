//! In-memory local store.

use crate::error::{Error, Result};
use crate::schema::CollectionSchema;
use crate::store::{LocalStore, LocalStoreFactory, Visitor};
use crate::{Key, KeyRange};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// One collection held in a key-ordered map.
#[derive(Debug)]
pub struct MemoryCollection {
    schema: CollectionSchema,
    records: RwLock<BTreeMap<Key, Value>>,
    next_key: AtomicI64,
}

impl MemoryCollection {
    pub fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            records: RwLock::new(BTreeMap::new()),
            next_key: AtomicI64::new(1),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Work out the key for a write, generating one when allowed.
    fn resolve_key(&self, record: &mut Value, explicit: Option<Key>) -> Result<Key> {
        if let Some(path) = &self.schema.key_path {
            if let Some(key) = path.extract(record) {
                self.observe(&key);
                return Ok(key);
            }
            if self.schema.auto_increment {
                let key = Key::Int(self.next_key.fetch_add(1, Ordering::Relaxed));
                if path.inject(record, &key) {
                    return Ok(key);
                }
            }
            return Err(Error::MissingKey(path.to_string()));
        }

        match explicit {
            Some(key) => {
                self.observe(&key);
                Ok(key)
            }
            None if self.schema.auto_increment => {
                Ok(Key::Int(self.next_key.fetch_add(1, Ordering::Relaxed)))
            }
            None => Err(Error::MissingKey(format!("{} (out-of-line)", self.schema.name))),
        }
    }

    /// Keep generated keys above any explicit integer key.
    fn observe(&self, key: &Key) {
        if let Key::Int(n) = key {
            self.next_key.fetch_max(n.saturating_add(1), Ordering::Relaxed);
        }
    }

    fn check_unique(&self, records: &BTreeMap<Key, Value>, key: &Key, record: &Value) -> Result<()> {
        for index in self.schema.indexes.iter().filter(|i| i.unique) {
            let Some(value) = index.key_path.extract(record) else {
                continue;
            };
            let clash = records
                .iter()
                .any(|(k, other)| k != key && index.key_path.extract(other).as_ref() == Some(&value));
            if clash {
                return Err(Error::Store(format!(
                    "unique index {} violated by {value}",
                    index.name
                )));
            }
        }
        Ok(())
    }

    fn write(&self, mut record: Value, key: Option<Key>, replace: bool) -> Result<Key> {
        let key = self.resolve_key(&mut record, key)?;
        let mut records = self.records.write();
        if !replace && records.contains_key(&key) {
            return Err(Error::RecordAlreadyExists(key.to_string()));
        }
        self.check_unique(&records, &key, &record)?;
        records.insert(key.clone(), record);
        Ok(key)
    }

    fn in_range(&self, range: Option<&KeyRange>) -> Vec<(Key, Value)> {
        self.records
            .read()
            .iter()
            .filter(|(k, _)| range.map_or(true, |r| r.contains(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl LocalStore for MemoryCollection {
    fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    async fn add(&self, record: Value, key: Option<Key>) -> Result<Key> {
        self.write(record, key, false)
    }

    async fn put(&self, record: Value, key: Option<Key>) -> Result<Key> {
        self.write(record, key, true)
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.records.write().remove(key);
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn get_all(&self, range: Option<&KeyRange>) -> Result<Vec<Value>> {
        Ok(self.in_range(range).into_iter().map(|(_, v)| v).collect())
    }

    async fn count(&self, range: Option<&KeyRange>) -> Result<usize> {
        let records = self.records.read();
        Ok(match range {
            Some(range) => records.keys().filter(|k| range.contains(k)).count(),
            None => records.len(),
        })
    }

    async fn for_each(&self, range: Option<&KeyRange>, visit: &mut Visitor<'_>) -> Result<()> {
        for (key, value) in self.in_range(range) {
            if !visit(&key, &value) {
                break;
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }
}

/// Hands out [`MemoryCollection`]s, keeping them across reopen.
#[derive(Debug, Default)]
pub struct MemoryStoreFactory {
    collections: DashMap<(String, String), Arc<MemoryCollection>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStoreFactory for MemoryStoreFactory {
    async fn open(&self, db: &str, schema: &CollectionSchema) -> Result<Arc<dyn LocalStore>> {
        let id = (db.to_string(), schema.name.clone());
        if let Some(existing) = self.collections.get(&id) {
            if existing.schema == *schema {
                return Ok(Arc::clone(existing.value()) as Arc<dyn LocalStore>);
            }
        }
        tracing::debug!(db, collection = %schema.name, "Opening memory collection");
        let collection = Arc::new(MemoryCollection::new(schema.clone()));
        self.collections.insert(id, Arc::clone(&collection));
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSchema;
    use serde_json::json;

    fn users() -> MemoryCollection {
        MemoryCollection::new(
            CollectionSchema::new("users")
                .with_key_path("id")
                .with_index(IndexSchema::new("by_email", "email").unique()),
        )
    }

    #[tokio::test]
    async fn add_rejects_existing_keys() {
        let store = users();
        store.add(json!({"id": 1, "name": "Ada"}), None).await.unwrap();
        let err = store.add(json!({"id": 1, "name": "Bob"}), None).await.unwrap_err();
        assert_eq!(err, Error::RecordAlreadyExists("1".into()));

        store.put(json!({"id": 1, "name": "Bob"}), None).await.unwrap();
        assert_eq!(
            store.get(&Key::Int(1)).await.unwrap(),
            Some(json!({"id": 1, "name": "Bob"}))
        );
    }

    #[tokio::test]
    async fn missing_keys_are_rejected() {
        let store = users();
        let err = store.put(json!({"name": "Ada"}), None).await.unwrap_err();
        assert_eq!(err, Error::MissingKey("id".into()));

        let out_of_line = MemoryCollection::new(CollectionSchema::new("blobs"));
        assert!(out_of_line.put(json!("x"), None).await.is_err());
        let key = out_of_line.put(json!("x"), Some(Key::from("k"))).await.unwrap();
        assert_eq!(key, Key::from("k"));
    }

    #[tokio::test]
    async fn generated_keys_skip_explicit_ones() {
        let store = MemoryCollection::new(
            CollectionSchema::new("notes").with_key_path("id").auto_increment(),
        );
        store.put(json!({"id": 5}), None).await.unwrap();
        let key = store.add(json!({"text": "hi"}), None).await.unwrap();
        assert_eq!(key, Key::Int(6));
        assert_eq!(
            store.get(&key).await.unwrap(),
            Some(json!({"id": 6, "text": "hi"}))
        );
    }

    #[tokio::test]
    async fn unique_indexes_are_enforced() {
        let store = users();
        store.put(json!({"id": 1, "email": "a@x"}), None).await.unwrap();
        assert!(store.put(json!({"id": 2, "email": "a@x"}), None).await.is_err());
        store.put(json!({"id": 1, "email": "a@x", "v": 2}), None).await.unwrap();
    }

    #[tokio::test]
    async fn ranges_and_cursors() {
        let store = users();
        for id in 1..=5 {
            store.put(json!({"id": id}), None).await.unwrap();
        }
        let range = KeyRange::bound(Key::Int(2), Key::Int(4), false, true);
        assert_eq!(store.count(Some(&range)).await.unwrap(), 2);
        assert_eq!(
            store.get_all(Some(&range)).await.unwrap(),
            vec![json!({"id": 2}), json!({"id": 3})]
        );

        let mut seen = Vec::new();
        store
            .for_each(None, &mut |key, _| {
                seen.push(key.clone());
                seen.len() < 3
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![Key::Int(1), Key::Int(2), Key::Int(3)]);

        store.delete(&Key::Int(1)).await.unwrap();
        store.delete(&Key::Int(1)).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 4);
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn factory_reuses_unchanged_collections() {
        let factory = MemoryStoreFactory::new();
        let schema = CollectionSchema::new("users").with_key_path("id");
        let first = factory.open("app", &schema).await.unwrap();
        first.put(json!({"id": 1}), None).await.unwrap();

        let again = factory.open("app", &schema).await.unwrap();
        assert_eq!(again.count(None).await.unwrap(), 1);

        let changed = factory
            .open("app", &schema.clone().with_key_path("email"))
            .await
            .unwrap();
        assert_eq!(changed.count(None).await.unwrap(), 0);
    }
}
