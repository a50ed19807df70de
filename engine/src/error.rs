//! Error types for the rtdb engine.

use crate::rpc::RpcError;
use crate::{CollectionName, DbName};
use thiserror::Error;

/// All possible errors from the rtdb engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Protocol errors
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("Unknown handler {0}")]
    NoHandler(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    // Call outcomes
    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(RpcError),

    #[error("call {method} timed out after {elapsed_ms}ms")]
    Timeout { method: String, elapsed_ms: u64 },

    #[error("peer disconnected")]
    Disconnected,

    // Expression errors
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("document backend sorts by a single field, got {0}")]
    MultiFieldSort(usize),

    // Store errors
    #[error("database not found: {0}")]
    DatabaseNotFound(DbName),

    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("record has no key at key path {0}")]
    MissingKey(String),

    #[error("record already exists: {0}")]
    RecordAlreadyExists(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidFrame(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
