//! Schema lookup over HTTP.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use rtdb_engine::DbSchema;

use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schema", get(all_schemas))
        .route("/db/{name}/schema", get(db_schema))
}

/// GET /schema - every served database schema.
async fn all_schemas(State(state): State<AppState>) -> Json<Vec<DbSchema>> {
    Json(state.server.schemas().to_vec())
}

/// GET /db/{name}/schema - one database schema.
async fn db_schema(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<DbSchema>> {
    state
        .server
        .database(&name)
        .map(|db| Json(db.schema().clone()))
        .ok_or_else(|| AppError::NotFound(format!("database {name}")))
}
