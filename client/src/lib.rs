//! # rtdb client
//!
//! Keeps local collections in sync with an rtdb server.
//!
//! The client connects through a [`Connector`], performs a schema handshake
//! on every connect, and replicates record changes both ways:
//!
//! - writes made through an [`ObservableCollection`] are sent to the server;
//! - changes pushed by the server are applied locally and never echoed back.
//!
//! Frames sent while offline are buffered by the [`ReconnectingTransport`]
//! and flushed in order after the next connect.
//!
//! [`WebSocketConnector`] dials a server's `/ws` endpoint; [`MemoryConnector`]
//! keeps both ends in one process.
//!
//! ## Example
//!
//! ```no_run
//! use rtdb_client::{ClientConfig, MemoryConnector, MemorySchemaCache, RealtimeDbClient};
//! use rtdb_engine::MemoryStoreFactory;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! # async fn example() -> rtdb_client::Result<()> {
//! let (connector, _listener) = MemoryConnector::new();
//! let (_online, online_rx) = watch::channel(true);
//! let client = RealtimeDbClient::connect(
//!     Arc::new(connector),
//!     online_rx,
//!     Arc::new(MemoryStoreFactory::new()),
//!     Arc::new(MemorySchemaCache::new()),
//!     ClientConfig::default(),
//! )
//! .await?;
//!
//! if let Ok(users) = client.collection("app", "users") {
//!     users.put(serde_json::json!({"_id": "u1", "name": "Ada"}), None).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod observable;
pub mod replica;
pub mod transport;

pub use cache::{FileSchemaCache, MemorySchemaCache, SchemaCache, SCHEMA_CACHE_KEY};
pub use config::{ClientConfig, DEFAULT_RECONNECT_DELAY};
pub use error::{ClientError, Result};
pub use observable::{DbEvents, ObservableCollection, ObservableDb};
pub use replica::{ClientPeer, RealtimeDbClient};
pub use transport::{
    ConnectionState, Connector, MemoryConnector, MemoryListener, ReconnectingTransport, ServerEnd, Socket,
    TransportEvent, TransportEventKind, WebSocketConnector,
};
