//! Reconnecting socket transport.
//!
//! The transport owns at most one socket at a time. Frames sent while the
//! socket is down are buffered and flushed, in order, as soon as the next
//! socket opens. A lost or failed connection schedules a single reconnect
//! attempt after the configured delay.
//!
//! All socket work happens on one task; the public handle only queues
//! commands, so the order of `send` calls is the order frames hit the wire.

mod connector;
mod memory;
mod websocket;

pub use connector::{Connector, FrameReader, FrameWriter, Socket};
pub use memory::{MemoryConnector, MemoryListener, ServerEnd};
pub use websocket::WebSocketConnector;

use crate::config::ClientConfig;
use crate::error::ClientError;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use rtdb_engine::{FrameSink, Listeners};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Listener keys for [`TransportEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    Connected,
    Error,
    Disconnected,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// A connection attempt or open socket failed
    Error(String),
    Disconnected,
    /// One inbound text frame
    Message(String),
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Connected => TransportEventKind::Connected,
            TransportEvent::Error(_) => TransportEventKind::Error,
            TransportEvent::Disconnected => TransportEventKind::Disconnected,
            TransportEvent::Message(_) => TransportEventKind::Message,
        }
    }
}

#[derive(Debug)]
enum Command {
    Send(String),
    Reconnect,
    Close,
}

/// Handle to the transport task.
pub struct ReconnectingTransport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    listeners: Arc<Listeners<TransportEventKind, TransportEvent>>,
    actor: Mutex<Option<Actor>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReconnectingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingTransport")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ReconnectingTransport {
    /// Create a stopped transport. Register listeners, then [`start`].
    ///
    /// `online` reports network availability; while it reads `false` no
    /// connection is attempted.
    ///
    /// [`start`]: ReconnectingTransport::start
    pub fn new(
        connector: Arc<dyn Connector>,
        online: watch::Receiver<bool>,
        config: &ClientConfig,
    ) -> Arc<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let listeners = Arc::new(Listeners::new());

        let actor = Actor {
            connector,
            online,
            online_closed: false,
            commands: command_rx,
            state: state_tx,
            listeners: Arc::clone(&listeners),
            reconnect_delay: config.reconnect_delay,
            buffer: VecDeque::new(),
            socket: None,
            connecting: None,
            timer: None,
        };

        Arc::new(Self {
            commands,
            state,
            listeners,
            actor: Mutex::new(Some(actor)),
            task: Mutex::new(None),
        })
    }

    /// Spawn the transport task. Later calls do nothing.
    pub fn start(&self) {
        let Some(actor) = self.actor.lock().take() else {
            tracing::debug!("Transport already started");
            return;
        };
        *self.task.lock() = Some(tokio::spawn(actor.run()));
    }

    pub fn listeners(&self) -> &Arc<Listeners<TransportEventKind, TransportEvent>> {
        &self.listeners
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Queue a frame. It is written now if connected, or after the next
    /// successful connect otherwise.
    pub fn send(&self, frame: impl Into<String>) -> crate::Result<()> {
        self.commands
            .send(Command::Send(frame.into()))
            .map_err(|_| ClientError::Closed)
    }

    /// Connect now, skipping any pending delay. Ignored while connected or
    /// connecting.
    pub fn reconnect(&self) -> crate::Result<()> {
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| ClientError::Closed)
    }

    /// Stop the transport and drop its socket.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Wait for the transport task to finish after [`close`].
    ///
    /// [`close`]: ReconnectingTransport::close
    pub async fn closed(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl FrameSink for ReconnectingTransport {
    fn send_frame(&self, frame: String) -> rtdb_engine::Result<()> {
        self.send(frame).map_err(|_| rtdb_engine::Error::Disconnected)
    }
}

struct Actor {
    connector: Arc<dyn Connector>,
    online: watch::Receiver<bool>,
    online_closed: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    listeners: Arc<Listeners<TransportEventKind, TransportEvent>>,
    reconnect_delay: Duration,
    buffer: VecDeque<String>,
    socket: Option<Socket>,
    connecting: Option<BoxFuture<'static, crate::Result<Socket>>>,
    timer: Option<Pin<Box<Sleep>>>,
}

/// Await an optional future, pending forever when there is none.
async fn when_some<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<crate::Result<String>> {
    match socket {
        Some(socket) => socket.reader.next().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        if *self.online.borrow() {
            self.begin_connect();
        } else {
            tracing::debug!("Offline, waiting for network before connecting");
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => self.send(frame).await,
                    Some(Command::Reconnect) => {
                        if self.socket.is_none() && self.connecting.is_none() {
                            self.timer = None;
                            self.begin_connect();
                        }
                    }
                    Some(Command::Close) | None => break,
                },
                result = when_some(&mut self.connecting), if self.connecting.is_some() => {
                    self.connecting = None;
                    match result {
                        Ok(socket) => self.on_open(socket).await,
                        Err(e) => self.on_failure(e.to_string(), false),
                    }
                }
                frame = next_frame(&mut self.socket), if self.socket.is_some() => match frame {
                    Some(Ok(frame)) => {
                        self.listeners.notify(&TransportEventKind::Message, &TransportEvent::Message(frame));
                    }
                    Some(Err(e)) => self.on_failure(e.to_string(), true),
                    None => self.on_close(),
                },
                _ = when_some(&mut self.timer), if self.timer.is_some() => {
                    self.timer = None;
                    if *self.online.borrow() {
                        self.begin_connect();
                    }
                }
                changed = self.online.changed(), if !self.online_closed => match changed {
                    Ok(()) => {
                        let online = *self.online.borrow_and_update();
                        tracing::debug!(online, "Network availability changed");
                        if online && self.socket.is_none() && self.connecting.is_none() && self.timer.is_none() {
                            self.begin_connect();
                        }
                    }
                    Err(_) => self.online_closed = true,
                },
            }
        }

        self.socket = None;
        self.connecting = None;
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!(buffered = self.buffer.len(), "Transport stopped");
    }

    fn begin_connect(&mut self) {
        if self.socket.is_some() || self.connecting.is_some() {
            return;
        }
        tracing::debug!("Connecting");
        self.state.send_replace(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        self.connecting = Some(async move { connector.connect().await }.boxed());
    }

    async fn on_open(&mut self, mut socket: Socket) {
        self.timer = None;

        while let Some(frame) = self.buffer.pop_front() {
            if let Err(e) = socket.writer.send(frame.clone()).await {
                self.buffer.push_front(frame);
                self.on_failure(e.to_string(), false);
                return;
            }
        }

        self.socket = Some(socket);
        self.state.send_replace(ConnectionState::Connected);
        tracing::info!("Connected");
        self.listeners.notify(&TransportEventKind::Connected, &TransportEvent::Connected);
    }

    async fn send(&mut self, frame: String) {
        let Some(socket) = self.socket.as_mut() else {
            tracing::trace!(buffered = self.buffer.len() + 1, "Buffering frame while disconnected");
            self.buffer.push_back(frame);
            return;
        };
        if let Err(e) = socket.writer.send(frame.clone()).await {
            self.buffer.push_front(frame);
            self.on_failure(e.to_string(), true);
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.timer.is_none() {
            tracing::debug!(delay_ms = self.reconnect_delay.as_millis() as u64, "Reconnect scheduled");
            self.timer = Some(Box::pin(tokio::time::sleep(self.reconnect_delay)));
        }
    }

    fn on_failure(&mut self, reason: String, was_connected: bool) {
        tracing::warn!(error = %reason, "Transport error");
        self.socket = None;
        self.connecting = None;
        self.state.send_replace(ConnectionState::Disconnected);
        self.schedule_reconnect();
        self.listeners.notify(&TransportEventKind::Error, &TransportEvent::Error(reason));
        if was_connected {
            self.listeners.notify(&TransportEventKind::Disconnected, &TransportEvent::Disconnected);
        }
    }

    fn on_close(&mut self) {
        tracing::info!("Connection closed by peer");
        self.socket = None;
        self.state.send_replace(ConnectionState::Disconnected);
        self.schedule_reconnect();
        self.listeners.notify(&TransportEventKind::Disconnected, &TransportEvent::Disconnected);
    }
}
