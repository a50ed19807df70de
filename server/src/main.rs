//! rtdb server binary.
//!
//! Serves the schemas in `SCHEMA_PATH` over `/ws`, storing documents in
//! PostgreSQL when `DATABASE_URL` is set and in memory otherwise.

use rtdb_engine::RpcConfig;
use rtdb_server::config::Config;
use rtdb_server::db::{self, DocumentStore, MemoryDocumentStore, PgDocumentStore};
use rtdb_server::{AppState, RealtimeDbServer};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rtdb_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let schemas = config.load_schemas()?;

    tracing::info!(
        databases = schemas.len(),
        "Starting rtdb server on {}:{}",
        config.host,
        config.port
    );
    if config.use_https {
        tracing::info!("USE_HTTPS set, advertising wss:// (TLS is terminated upstream)");
    }

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;
            Arc::new(PgDocumentStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, documents are kept in memory");
            Arc::new(MemoryDocumentStore::new())
        }
    };

    let server = RealtimeDbServer::new(
        schemas,
        store,
        RpcConfig {
            call_timeout: config.call_timeout,
        },
    );

    let addr = config.addr();
    let state = AppState {
        server,
        config: Arc::new(config),
    };
    rtdb_server::listen(state, &addr).await?;

    Ok(())
}
