//! Socket factory port.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::Sink;
use std::pin::Pin;

/// Outbound frames of an open socket.
pub type FrameWriter = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;

/// Inbound frames of an open socket. The stream ends when the peer closes.
pub type FrameReader = BoxStream<'static, Result<String>>;

/// An open, text-framed socket.
pub struct Socket {
    pub writer: FrameWriter,
    pub reader: FrameReader,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Opens sockets to the server.
///
/// Abstracts the network layer so the transport can run over websockets,
/// in-process channels, or anything else that moves text frames.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Socket>;
}
