//! WebSocket upgrade endpoint.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::handlers::handle_websocket_connection;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// GET /ws - upgrade to a replication socket.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let server = state.server.clone();
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, server))
}
