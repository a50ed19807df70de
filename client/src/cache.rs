//! Persistence of the last schema received from the server.
//!
//! The cached schema lets a client open its local collections before the
//! first handshake completes.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rtdb_engine::DbSchema;
use std::path::{Path, PathBuf};

/// Storage key of the cached schema array.
pub const SCHEMA_CACHE_KEY: &str = "RTSDB_SCHEMA";

#[async_trait]
pub trait SchemaCache: Send + Sync {
    /// The last saved schema array, if any.
    async fn load(&self) -> Result<Option<Vec<DbSchema>>>;

    async fn save(&self, schemas: &[DbSchema]) -> Result<()>;
}

/// Keeps the serialized schema in memory.
#[derive(Debug, Default)]
pub struct MemorySchemaCache {
    stored: Mutex<Option<String>>,
}

impl MemorySchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored JSON text, exactly as saved.
    pub fn raw(&self) -> Option<String> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl SchemaCache for MemorySchemaCache {
    async fn load(&self) -> Result<Option<Vec<DbSchema>>> {
        let stored = self.stored.lock().clone();
        match stored {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, schemas: &[DbSchema]) -> Result<()> {
        *self.stored.lock() = Some(serde_json::to_string(schemas)?);
        Ok(())
    }
}

/// Keeps the schema in `<dir>/RTSDB_SCHEMA.json`.
#[derive(Debug, Clone)]
pub struct FileSchemaCache {
    path: PathBuf,
}

impl FileSchemaCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SCHEMA_CACHE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SchemaCache for FileSchemaCache {
    async fn load(&self) -> Result<Option<Vec<DbSchema>>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, schemas: &[DbSchema]) -> Result<()> {
        let json = serde_json::to_string_pretty(schemas)?;
        // Atomic replace via rename.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "Schema cache saved");
        Ok(())
    }
}
