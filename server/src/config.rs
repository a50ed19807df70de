//! Configuration management for the server.

use rtdb_engine::DbSchema;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; documents stay in memory when unset
    pub database_url: Option<String>,
    /// JSON file holding the array of served database schemas
    pub schema_path: PathBuf,
    /// RPC call timeout; `None` waits forever
    pub call_timeout: Option<Duration>,
    /// Clients reach the server through a TLS terminator
    pub use_https: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let schema_path = env::var("SCHEMA_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingSchemaPath)?;

        let call_timeout = match env::var("CALL_TIMEOUT_SECS") {
            Ok(secs) => parse_timeout(&secs)?,
            Err(_) => Some(rtdb_engine::rpc::DEFAULT_CALL_TIMEOUT),
        };

        let use_https = env::var("USE_HTTPS").is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE"));

        Ok(Self {
            host,
            port,
            database_url,
            schema_path,
            call_timeout,
            use_https,
        })
    }

    /// Read the served schemas from `schema_path`.
    pub fn load_schemas(&self) -> Result<Vec<DbSchema>, ConfigError> {
        let text = std::fs::read_to_string(&self.schema_path)
            .map_err(|e| ConfigError::InvalidSchema(format!("{}: {e}", self.schema_path.display())))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::InvalidSchema(e.to_string()))
    }

    /// Scheme clients should use for the websocket endpoint.
    pub fn websocket_scheme(&self) -> &'static str {
        if self.use_https {
            "wss"
        } else {
            "ws"
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `0` disables the timeout.
fn parse_timeout(secs: &str) -> Result<Option<Duration>, ConfigError> {
    match secs.parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(Duration::from_secs(n))),
        Err(_) => Err(ConfigError::InvalidCallTimeout),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SCHEMA_PATH environment variable is required")]
    MissingSchemaPath,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid CALL_TIMEOUT_SECS value")]
    InvalidCallTimeout,

    #[error("Invalid schema file: {0}")]
    InvalidSchema(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(schema_path: PathBuf) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 3000,
            database_url: None,
            schema_path,
            call_timeout: None,
            use_https: false,
        }
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("0").unwrap(), None);
        assert_eq!(parse_timeout("5").unwrap(), Some(Duration::from_secs(5)));
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_load_schemas() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "app", "collections": [{{"name": "users", "keyPath": "id"}}]}}]"#).unwrap();

        let schemas = config(file.path().to_path_buf()).load_schemas().unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].collections[0].name, "users");
    }

    #[test]
    fn test_bad_schema_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            config(file.path().to_path_buf()).load_schemas(),
            Err(ConfigError::InvalidSchema(_))
        ));
        assert!(config(PathBuf::from("/nonexistent/schema.json")).load_schemas().is_err());
    }

    #[test]
    fn test_websocket_scheme() {
        let mut config = config(PathBuf::new());
        assert_eq!(config.websocket_scheme(), "ws");
        config.use_https = true;
        assert_eq!(config.websocket_scheme(), "wss");
    }
}
