//! WebSocket connector.
//!
//! Dials an rtdb server's `/ws` endpoint. Each text message is one frame;
//! a close message ends the reader. Binary messages are not part of the
//! protocol and are skipped.

use super::connector::{Connector, Socket};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Opens websocket connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Connect to `url`, for example `ws://127.0.0.1:3000/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connector for the `/ws` endpoint of the server at `host:port`.
    pub fn for_server(scheme: &str, addr: &str) -> Self {
        Self::new(format!("{scheme}://{addr}/ws"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Socket> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Connect(format!("{}: {}", self.url, e)))?;
        tracing::debug!(url = %self.url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = stream.split();
        let writer = sink
            .sink_map_err(|e| ClientError::Socket(e.to_string()))
            .with(|frame: String| future::ready(Ok::<_, ClientError>(Message::text(frame))));

        let url = self.url.clone();
        let reader = stream
            .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(move |message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => {
                        tracing::warn!(url = %url, bytes = data.len(), "Binary messages not supported");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ClientError::Socket(e.to_string()))),
                })
            });

        Ok(Socket {
            writer: Box::pin(writer),
            reader: reader.boxed(),
        })
    }
}
