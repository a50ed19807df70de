//! rtdb server - realtime replication over websockets.
//!
//! Clients connect to `/ws` and speak JSON-RPC 2.0. Every record change a
//! client announces is relayed to all other clients and then written to
//! the authoritative document store. Clients fetch the served schemas with
//! `RTSDB_GET_SCHEMA` and can ask for the rows of a query with
//! `RTSDB_NOTIFY`.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use crate::config::Config;
use crate::db::{Database, DocumentStore};
use crate::websocket::ConnectionManager;
use axum::Router;
use futures::{Sink, SinkExt, Stream, StreamExt};
use rtdb_engine::{DbName, DbSchema, Handlers, Inbound, Listeners, Method, ReplicationEvent, RpcConfig, RpcPeer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Correlator of one client connection.
pub type ServerPeer = RpcPeer<CallContext>;

/// Caller context handed to handlers and listeners.
#[derive(Clone)]
pub struct CallContext {
    pub conn_id: Arc<str>,
    pub server: Arc<RealtimeDbServer>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext").field("conn_id", &self.conn_id).finish()
    }
}

/// The replication hub shared by every connection.
pub struct RealtimeDbServer {
    schemas: Vec<DbSchema>,
    databases: Arc<HashMap<DbName, Database>>,
    connections: Arc<ConnectionManager>,
    handlers: Arc<Handlers<CallContext>>,
    listeners: Arc<Listeners<Method, Inbound<CallContext>>>,
    rpc_config: RpcConfig,
    writes: mpsc::UnboundedSender<ReplicationEvent>,
}

impl fmt::Debug for RealtimeDbServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeDbServer")
            .field("databases", &self.databases.keys().collect::<Vec<_>>())
            .field("connections", &self.connections.connection_count())
            .finish()
    }
}

impl RealtimeDbServer {
    /// Serve `schemas` from `store`.
    ///
    /// Spawns the write task, so it must be called inside a tokio runtime.
    pub fn new(schemas: Vec<DbSchema>, store: Arc<dyn DocumentStore>, rpc_config: RpcConfig) -> Arc<Self> {
        let databases: HashMap<DbName, Database> = schemas
            .iter()
            .map(|schema| (schema.name.clone(), Database::new(schema.clone(), Arc::clone(&store))))
            .collect();
        let databases = Arc::new(databases);

        let handlers = Arc::new(Handlers::new());
        let listeners = Arc::new(Listeners::new());
        crate::handlers::register_replication(&handlers, &listeners);

        let (writes, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(Arc::clone(&databases), queue));

        Arc::new(Self {
            schemas,
            databases,
            connections: ConnectionManager::new_shared(),
            handlers,
            listeners,
            rpc_config,
            writes,
        })
    }

    pub fn schemas(&self) -> &[DbSchema] {
        &self.schemas
    }

    pub fn database(&self, name: &str) -> Option<&Database> {
        self.databases.get(name)
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Register a connection whose outgoing frames go to `sender`.
    pub fn open_connection(&self, sender: mpsc::UnboundedSender<String>) -> String {
        let peer = Arc::new(RpcPeer::with_registries(
            Arc::new(sender.clone()),
            Arc::clone(&self.handlers),
            Arc::clone(&self.listeners),
            self.rpc_config,
        ));
        let conn_id = self.connections.register(sender, peer);
        tracing::info!(
            conn_id = %conn_id,
            active_connections = self.connections.connection_count(),
            "Client connected"
        );
        conn_id
    }

    /// Process one frame received on `conn_id`.
    pub fn receive(self: &Arc<Self>, conn_id: &str, frame: &str) {
        let Some(peer) = self.connections.peer(conn_id) else {
            tracing::warn!(conn_id = %conn_id, "Frame for unknown connection");
            return;
        };
        let ctx = CallContext {
            conn_id: Arc::from(conn_id),
            server: Arc::clone(self),
        };
        peer.receive(ctx, frame);
    }

    pub fn close_connection(&self, conn_id: &str) {
        self.connections.unregister(conn_id);
        tracing::info!(
            conn_id = %conn_id,
            active_connections = self.connections.connection_count(),
            "Client disconnected"
        );
    }

    /// Queue a change for the authoritative store. Writes run one at a
    /// time in the order they were queued.
    pub fn enqueue_write(&self, event: ReplicationEvent) {
        if self.writes.send(event).is_err() {
            tracing::error!("Write task stopped, change dropped");
        }
    }

    /// Serve one connection over any text frame stream and sink.
    ///
    /// Returns when the incoming stream ends.
    pub async fn serve_frames<R, W>(self: Arc<Self>, mut incoming: R, mut outgoing: W)
    where
        R: Stream<Item = String> + Unpin,
        W: Sink<String> + Unpin + Send + 'static,
        W::Error: fmt::Display,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let conn_id = self.open_connection(tx);

        let send_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = outgoing.send(frame).await {
                    tracing::warn!("Failed to send frame: {}", e);
                    break;
                }
            }
        });

        while let Some(frame) = incoming.next().await {
            self.receive(&conn_id, &frame);
        }

        self.close_connection(&conn_id);
        send_task.abort();
    }
}

/// Apply queued changes to the store. Failures are logged only.
async fn write_loop(databases: Arc<HashMap<DbName, Database>>, mut queue: mpsc::UnboundedReceiver<ReplicationEvent>) {
    while let Some(event) = queue.recv().await {
        let change = &event.change;
        let Some(db) = databases.get(&change.db) else {
            tracing::warn!(db = %change.db, "Change for unknown database dropped");
            continue;
        };
        match db.apply(event.kind, change).await {
            Ok(key) => tracing::debug!(
                db = %change.db,
                collection = %change.collection,
                key = %key,
                kind = ?event.kind,
                "Change stored"
            ),
            Err(e) => tracing::warn!(
                db = %change.db,
                collection = %change.collection,
                error = %e,
                "Failed to store change"
            ),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<RealtimeDbServer>,
    pub config: Arc<Config>,
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind `addr` and serve until the process stops.
pub async fn listen(state: AppState, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    tracing::info!(
        "Server listening on {}://{}/ws",
        state.config.websocket_scheme(),
        listener.local_addr()?
    );
    axum::serve(listener, router(state)).await
}
