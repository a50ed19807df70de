//! The replication client.
//!
//! [`RealtimeDbClient`] ties the transport, the correlator and the local
//! collections together:
//!
//! - every `Connected` event triggers a schema handshake that rebuilds the
//!   local collections and refreshes the schema cache;
//! - local writes are forwarded to the server as record notifications;
//! - record notifications from the server are applied locally, in arrival
//!   order, and never forwarded back.

use crate::cache::SchemaCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::observable::{ObservableCollection, ObservableDb};
use crate::transport::{Connector, ReconnectingTransport, TransportEvent, TransportEventKind};
use parking_lot::{Mutex, RwLock};
use rtdb_engine::rpc::BoxError;
use rtdb_engine::{
    DbName, DbSchema, Error, EventKind, Inbound, LocalStoreFactory, Method, Origin, Query,
    ReplicationEvent, RpcPeer,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Correlator of a client, with the client itself as handler context.
pub type ClientPeer = RpcPeer<Arc<RealtimeDbClient>>;

pub struct RealtimeDbClient {
    transport: Arc<ReconnectingTransport>,
    peer: ClientPeer,
    factory: Arc<dyn LocalStoreFactory>,
    cache: Arc<dyn SchemaCache>,
    databases: RwLock<HashMap<DbName, Arc<ObservableDb>>>,
    schema_generation: watch::Sender<u64>,
    apply_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RealtimeDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeDbClient")
            .field("transport", &self.transport)
            .field("databases", &self.database_names())
            .finish_non_exhaustive()
    }
}

impl RealtimeDbClient {
    /// Build a client and start connecting.
    ///
    /// Collections are opened from the cached schema, if any, before the
    /// first connection attempt.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        online: watch::Receiver<bool>,
        factory: Arc<dyn LocalStoreFactory>,
        cache: Arc<dyn SchemaCache>,
        config: ClientConfig,
    ) -> Result<Arc<Self>> {
        let transport = ReconnectingTransport::new(connector, online, &config);
        let peer = RpcPeer::new(transport.clone(), config.rpc_config());
        let (schema_generation, _) = watch::channel(0);

        let client = Arc::new(Self {
            transport,
            peer,
            factory,
            cache,
            databases: RwLock::new(HashMap::new()),
            schema_generation,
            apply_task: Mutex::new(None),
        });

        match client.cache.load().await {
            Ok(Some(schemas)) => {
                tracing::debug!(databases = schemas.len(), "Bootstrapping from cached schema");
                client.install(schemas).await?;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable schema cache"),
        }

        client.register_handlers();
        let (apply_tx, apply_rx) = mpsc::unbounded_channel();
        client.register_record_listeners(apply_tx);
        *client.apply_task.lock() = Some(tokio::spawn(apply_loop(Arc::downgrade(&client), apply_rx)));
        client.wire_transport();
        client.transport.start();

        Ok(client)
    }

    fn register_handlers(&self) {
        let handlers = self.peer.handlers();
        handlers.set(Method::Select, |client: Arc<Self>, params: Vec<Value>| async move {
            let rows = client.select(&Query::from_params(&params)?).await?;
            Ok(Value::Array(rows))
        });
        handlers.set(Method::Get, |client: Arc<Self>, params: Vec<Value>| async move {
            let rows = client.select(&Query::from_params(&params)?.with_limit(1)).await?;
            Ok(rows.into_iter().next().unwrap_or(Value::Null))
        });
    }

    /// Queue inbound record notifications for the apply worker.
    fn register_record_listeners(&self, apply_tx: mpsc::UnboundedSender<ReplicationEvent>) {
        for kind in EventKind::ALL {
            let method = kind.method();
            let apply_tx = apply_tx.clone();
            self.peer.listeners().add(method, move |inbound: &Inbound<Arc<Self>>| {
                let event = ReplicationEvent::from_params(method, &inbound.params)?;
                apply_tx
                    .send(event)
                    .map_err(|_| BoxError::from("apply queue closed"))
            });
        }
    }

    fn wire_transport(self: &Arc<Self>) {
        let listeners = self.transport.listeners();

        let weak = Arc::downgrade(self);
        listeners.add(TransportEventKind::Message, move |event: &TransportEvent| {
            if let (TransportEvent::Message(frame), Some(client)) = (event, weak.upgrade()) {
                client.peer.receive(Arc::clone(&client), frame);
            }
            Ok(())
        });

        let weak = Arc::downgrade(self);
        listeners.add(TransportEventKind::Connected, move |_: &TransportEvent| {
            if let Some(client) = weak.upgrade() {
                tokio::spawn(async move {
                    if let Err(e) = client.refresh_schema().await {
                        tracing::warn!(error = %e, "Schema handshake failed");
                    }
                });
            }
            Ok(())
        });
    }

    /// Fetch the schema from the server, rebuild the local collections and
    /// cache the schema.
    pub async fn refresh_schema(self: &Arc<Self>) -> Result<Vec<DbSchema>> {
        let result = self.peer.call(Method::Schema, Vec::new()).await?;
        let schemas: Vec<DbSchema> = serde_json::from_value(result)?;
        self.install(schemas.clone()).await?;
        self.cache.save(&schemas).await?;
        tracing::info!(databases = schemas.len(), "Schema installed");
        Ok(schemas)
    }

    /// Replace every local database with one built from `schemas`.
    async fn install(self: &Arc<Self>, schemas: Vec<DbSchema>) -> Result<()> {
        let mut opened = HashMap::new();
        for schema in schemas {
            let db = Arc::new(ObservableDb::open(self.factory.as_ref(), schema).await?);
            self.forward_local_writes(&db);
            opened.insert(db.name().to_string(), db);
        }

        let previous = std::mem::replace(&mut *self.databases.write(), opened);
        for db in previous.values() {
            db.retire();
        }
        self.schema_generation.send_modify(|generation| *generation += 1);
        Ok(())
    }

    fn forward_local_writes(self: &Arc<Self>, db: &ObservableDb) {
        for kind in EventKind::ALL {
            let weak: Weak<Self> = Arc::downgrade(self);
            db.events().add(kind, move |event: &ReplicationEvent| {
                if event.origin != Origin::Local {
                    return Ok(());
                }
                let Some(client) = weak.upgrade() else {
                    return Ok(());
                };
                client.peer.notify(event.method(), event.to_params()?)?;
                Ok(())
            });
        }
    }

    async fn apply_remote(&self, event: ReplicationEvent) -> Result<()> {
        let collection = self.collection(&event.change.db, &event.change.collection)?;
        collection.apply_remote(event.kind, event.change).await
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.collection(&query.db, &query.collection)?.query(query).await
    }

    /// A database by name. `None` until its schema is known.
    ///
    /// Each schema refresh replaces every database, so handles taken before
    /// `schema_changes()` fires are retired and must be fetched again.
    pub fn database(&self, name: &str) -> Option<Arc<ObservableDb>> {
        self.databases.read().get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<DbName> {
        self.databases.read().keys().cloned().collect()
    }

    pub fn collection(&self, db: &str, collection: &str) -> Result<Arc<ObservableCollection>> {
        let db = self
            .database(db)
            .ok_or_else(|| Error::DatabaseNotFound(db.to_string()))?;
        db.collection(collection)
            .ok_or_else(|| ClientError::from(Error::CollectionNotFound(collection.to_string())))
    }

    /// Counts installed schemas; bumps after every rebuild.
    pub fn schema_changes(&self) -> watch::Receiver<u64> {
        self.schema_generation.subscribe()
    }

    /// Ask the server to push every record matching `query`.
    ///
    /// Rows arrive as record notifications and are applied like any other
    /// remote change. Returns the number of rows the server pushed.
    pub async fn request_snapshot(&self, query: &Query) -> Result<usize> {
        let pushed = self.peer.call(Method::Notify, query.to_params()?).await?;
        Ok(pushed.as_u64().unwrap_or(0) as usize)
    }

    pub fn transport(&self) -> &Arc<ReconnectingTransport> {
        &self.transport
    }

    pub fn peer(&self) -> &ClientPeer {
        &self.peer
    }

    /// Stop the transport and the apply worker.
    pub async fn close(&self) {
        self.transport.close();
        self.transport.closed().await;
        if let Some(task) = self.apply_task.lock().take() {
            task.abort();
        }
    }
}

/// Apply remote changes one at a time, in arrival order.
async fn apply_loop(client: Weak<RealtimeDbClient>, mut events: mpsc::UnboundedReceiver<ReplicationEvent>) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        let (db, collection) = (event.change.db.clone(), event.change.collection.clone());
        if let Err(e) = client.apply_remote(event).await {
            tracing::warn!(db = %db, collection = %collection, error = %e, "Remote change not applied");
        }
    }
    tracing::debug!("Apply worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySchemaCache;
    use crate::transport::MemoryConnector;
    use rtdb_engine::{CollectionSchema, MemoryStoreFactory};

    async fn offline_client(cache: Arc<MemorySchemaCache>) -> Arc<RealtimeDbClient> {
        let (connector, _listener) = MemoryConnector::new();
        let (_online_tx, online) = watch::channel(false);
        RealtimeDbClient::connect(
            Arc::new(connector),
            online,
            Arc::new(MemoryStoreFactory::new()),
            cache,
            ClientConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_database_is_not_found() {
        let client = offline_client(Arc::new(MemorySchemaCache::new())).await;
        assert!(client.database("app").is_none());
        assert!(matches!(
            client.collection("app", "users"),
            Err(ClientError::Engine(Error::DatabaseNotFound(_)))
        ));
        client.close().await;
    }

    #[tokio::test]
    async fn cached_schema_is_installed_before_connecting() {
        let cache = Arc::new(MemorySchemaCache::new());
        let schema = DbSchema::new("app").with_collection(CollectionSchema::new("users").with_key_path("id"));
        cache.save(&[schema]).await.unwrap();

        let client = offline_client(Arc::clone(&cache)).await;
        assert_eq!(client.database_names(), vec!["app".to_string()]);
        assert!(client.collection("app", "users").is_ok());
        assert_eq!(*client.schema_changes().borrow(), 1);
        client.close().await;
    }

    #[tokio::test]
    async fn offline_writes_queue_without_failing() {
        let cache = Arc::new(MemorySchemaCache::new());
        let schema = DbSchema::new("app").with_collection(CollectionSchema::new("users").with_key_path("id"));
        cache.save(&[schema]).await.unwrap();

        let client = offline_client(cache).await;
        let users = client.collection("app", "users").unwrap();
        users.put(serde_json::json!({"id": 1}), None).await.unwrap();
        assert_eq!(users.count(None).await.unwrap(), 1);
        client.close().await;
    }
}
