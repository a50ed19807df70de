//! WebSocket handler for replication.
//!
//! Bridges one websocket to the server: text frames go to the connection's
//! correlator, and frames queued for the connection are written back.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::RealtimeDbServer;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the server
/// 2. Spawns a task to forward outgoing frames
/// 3. Feeds incoming frames to the connection's correlator
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(socket: WebSocket, server: Arc<RealtimeDbServer>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = server.open_connection(tx);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(frame.into())).await {
                tracing::warn!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => server.receive(&conn_id, text.as_str()),
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    server.close_connection(&conn_id);
    send_task.abort();
}
