//! WebSocket connection manager.
//!
//! Tracks connected clients and their correlators, and relays frames to
//! them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::ServerPeer;

/// Sender for outgoing text frames.
pub type FrameSender = mpsc::UnboundedSender<String>;

/// A single connected client.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Channel to send frames to this connection
    pub sender: FrameSender,
    /// Correlator for calls to and from this connection
    pub peer: Arc<ServerPeer>,
}

/// Manages active connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection. Returns the connection ID.
    pub fn register(&self, sender: FrameSender, peer: Arc<ServerPeer>) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                sender,
                peer,
            },
        );
        tracing::info!(conn_id = %conn_id, "Connection registered");
        conn_id
    }

    pub fn unregister(&self, conn_id: &str) -> bool {
        let removed = self.connections.remove(conn_id).is_some();
        if removed {
            tracing::info!(conn_id = %conn_id, "Connection unregistered");
        }
        removed
    }

    /// Correlator of a connection.
    pub fn peer(&self, conn_id: &str) -> Option<Arc<ServerPeer>> {
        self.connections.get(conn_id).map(|conn| Arc::clone(&conn.peer))
    }

    /// Send a frame to every connection except the sender.
    ///
    /// Returns the number of connections that received the frame.
    pub fn broadcast_except(&self, sender_conn_id: &str, frame: &str) -> usize {
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.id != sender_conn_id && conn.sender.send(frame.to_string()).is_ok() {
                sent_count += 1;
            }
        }

        tracing::debug!(
            sender = %sender_conn_id,
            recipients = sent_count,
            "Broadcast frame to connections"
        );

        sent_count
    }

    /// Send a frame to one connection.
    pub fn send_to(&self, conn_id: &str, frame: String) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
