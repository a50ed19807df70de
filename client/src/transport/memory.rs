//! In-process connector.
//!
//! Each successful [`MemoryConnector::connect`] hands the server side of a
//! fresh channel pair to the matching [`MemoryListener`].

use super::connector::{Connector, Socket};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures::channel::mpsc as frames;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Server side of one in-process connection.
///
/// Dropping it closes the connection for the client.
#[derive(Debug)]
pub struct ServerEnd {
    /// Frames written by the client
    pub incoming: frames::UnboundedReceiver<String>,
    /// Frames delivered to the client
    pub outgoing: frames::UnboundedSender<String>,
}

impl ServerEnd {
    /// Deliver a frame to the client.
    pub fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.outgoing
            .unbounded_send(frame.into())
            .map_err(|e| ClientError::Socket(e.to_string()))
    }

    /// Next frame from the client, `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.next().await
    }
}

/// Accepts connections made through a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.accepted.recv().await
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            accept_tx,
            refusing: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryListener { accepted })
    }

    /// Make further connection attempts fail.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Socket> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(ClientError::Connect("connection refused".into()));
        }

        let (to_server, incoming) = frames::unbounded();
        let (outgoing, from_server) = frames::unbounded();
        self.accept_tx
            .send(ServerEnd { incoming, outgoing })
            .map_err(|_| ClientError::Connect("listener closed".into()))?;

        Ok(Socket {
            writer: Box::pin(to_server.sink_map_err(|e| ClientError::Socket(e.to_string()))),
            reader: from_server.map(Ok).boxed(),
        })
    }
}
