//! Local collections that announce their writes.
//!
//! Every write through an [`ObservableCollection`] raises a
//! [`ReplicationEvent`] on its database's listener registry. Writes made
//! through the public API are tagged [`Origin::Local`]; writes received
//! from the server go through [`ObservableCollection::apply_remote`] and are
//! tagged [`Origin::Remote`].

use crate::error::Result;
use rtdb_engine::{
    CollectionSchema, DbName, DbSchema, Error, EventKind, Key, KeyRange, Listeners, LocalStore,
    LocalStoreFactory, Origin, Query, RecordChange, ReplicationEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-database event registry.
pub type DbEvents = Listeners<EventKind, ReplicationEvent>;

/// A collection handle whose writes are announced on its database's events.
///
/// A schema refresh retires the handle: its writes still reach the local
/// store but are no longer replicated. Fetch a fresh handle from the client
/// after `schema_changes()` fires.
pub struct ObservableCollection {
    db: DbName,
    store: Arc<dyn LocalStore>,
    events: Arc<DbEvents>,
    retired: Arc<AtomicBool>,
}

impl std::fmt::Debug for ObservableCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableCollection")
            .field("db", &self.db)
            .field("collection", &self.name())
            .finish()
    }
}

impl ObservableCollection {
    pub fn new(db: impl Into<DbName>, store: Arc<dyn LocalStore>, events: Arc<DbEvents>) -> Self {
        Self::sharing_retirement(db, store, events, Arc::new(AtomicBool::new(false)))
    }

    fn sharing_retirement(
        db: impl Into<DbName>,
        store: Arc<dyn LocalStore>,
        events: Arc<DbEvents>,
        retired: Arc<AtomicBool>,
    ) -> Self {
        Self {
            db: db.into(),
            store,
            events,
            retired,
        }
    }

    /// Whether a schema refresh replaced this handle.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.store.schema().name
    }

    pub fn schema(&self) -> &CollectionSchema {
        self.store.schema()
    }

    /// Insert a new record and announce it.
    pub async fn add(&self, record: Value, key: Option<Key>) -> Result<Key> {
        let key = self.store.add(record.clone(), key).await?;
        let stored = self.store.get(&key).await?.unwrap_or(record);
        self.emit(Origin::Local, EventKind::Added, Some(stored), key.clone());
        Ok(key)
    }

    /// Insert or replace a record and announce it.
    pub async fn put(&self, record: Value, key: Option<Key>) -> Result<Key> {
        let key = self.store.put(record.clone(), key).await?;
        let stored = self.store.get(&key).await?.unwrap_or(record);
        self.emit(Origin::Local, EventKind::Put, Some(stored), key.clone());
        Ok(key)
    }

    /// Delete a record and announce it.
    pub async fn delete(&self, key: &Key) -> Result<()> {
        self.store.delete(key).await?;
        self.emit(Origin::Local, EventKind::Deleted, None, key.clone());
        Ok(())
    }

    /// Apply a change received from the server.
    ///
    /// The change is re-raised as a remote event so local observers see it
    /// without it being sent back out.
    pub async fn apply_remote(&self, kind: EventKind, change: RecordChange) -> Result<()> {
        let key = change
            .key
            .clone()
            .or_else(|| change.record.as_ref().and_then(|r| self.schema().key_of(r)));

        match (kind, change.record.clone()) {
            (EventKind::Added, Some(record)) => match self.store.add(record.clone(), key.clone()).await {
                Err(Error::RecordAlreadyExists(_)) => {
                    tracing::debug!(collection = %self.name(), "Remote add of existing record, replacing");
                    self.store.put(record, key).await?;
                }
                other => {
                    other?;
                }
            },
            (EventKind::Put, Some(record)) => {
                self.store.put(record, key).await?;
            }
            (EventKind::Deleted, _) => {
                let key = key.ok_or_else(|| Error::MissingKey(format!("{} delete", self.name())))?;
                self.store.delete(&key).await?;
            }
            (kind, None) => {
                return Err(Error::InvalidParams(format!("{kind:?} change without a record")).into());
            }
        }

        self.events.notify(&kind, &ReplicationEvent::remote(kind, change));
        Ok(())
    }

    fn emit(&self, origin: Origin, kind: EventKind, record: Option<Value>, key: Key) {
        if self.is_retired() {
            tracing::warn!(
                db = %self.db,
                collection = %self.name(),
                key = %key,
                "Write through a retired collection handle is not replicated"
            );
            return;
        }
        let mut change = RecordChange::new(self.db.clone(), self.name()).with_key(key);
        change.record = record;
        let event = ReplicationEvent {
            kind,
            origin,
            change,
        };
        self.events.notify(&kind, &event);
    }

    pub async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.store.get(key).await?)
    }

    pub async fn get_all(&self, range: Option<&KeyRange>) -> Result<Vec<Value>> {
        Ok(self.store.get_all(range).await?)
    }

    pub async fn count(&self, range: Option<&KeyRange>) -> Result<usize> {
        Ok(self.store.count(range).await?)
    }

    /// Run a query over this collection in process.
    pub async fn query(&self, query: &Query) -> Result<Vec<Value>> {
        let records = self.store.get_all(None).await?;
        Ok(query.apply(records)?)
    }
}

/// One replicated database: its collections and their event registry.
pub struct ObservableDb {
    schema: DbSchema,
    collections: HashMap<String, Arc<ObservableCollection>>,
    events: Arc<DbEvents>,
    retired: Arc<AtomicBool>,
}

impl std::fmt::Debug for ObservableDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableDb")
            .field("name", &self.schema.name)
            .field("collections", &self.collections.len())
            .finish()
    }
}

impl ObservableDb {
    /// Open a store for every collection in `schema`.
    pub async fn open(factory: &dyn LocalStoreFactory, schema: DbSchema) -> Result<Self> {
        let events = Arc::new(DbEvents::new());
        let retired = Arc::new(AtomicBool::new(false));
        let mut collections = HashMap::new();
        for collection in &schema.collections {
            let store = factory.open(&schema.name, collection).await?;
            collections.insert(
                collection.name.clone(),
                Arc::new(ObservableCollection::sharing_retirement(
                    schema.name.clone(),
                    store,
                    Arc::clone(&events),
                    Arc::clone(&retired),
                )),
            );
        }
        Ok(Self {
            schema,
            collections,
            events,
            retired,
        })
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &DbSchema {
        &self.schema
    }

    pub fn collection(&self, name: &str) -> Option<Arc<ObservableCollection>> {
        self.collections.get(name).cloned()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Events raised by every collection of this database.
    pub fn events(&self) -> &Arc<DbEvents> {
        &self.events
    }

    /// Detach this database after a schema refresh. Its listeners are
    /// dropped and its collection handles stop raising events.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.events.clear();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}
