//! Error types for the rtdb client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Engine(#[from] rtdb_engine::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("transport closed")]
    Closed,
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

impl From<ClientError> for rtdb_engine::Error {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Engine(e) => e,
            ClientError::Closed => rtdb_engine::Error::Disconnected,
            other => rtdb_engine::Error::Store(other.to_string()),
        }
    }
}
