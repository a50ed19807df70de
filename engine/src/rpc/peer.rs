//! Call/response correlation over a frame transport.
//!
//! An [`RpcPeer`] sits on one end of a connection. Outbound calls are
//! parked in a pending table until the matching response arrives; inbound
//! calls are answered by the handler registry and inbound notifications
//! fan out to the listener registry.

use crate::error::{Error, Result};
use crate::rpc::message::{next_call_id, Message, Request, RequestId, Response, RpcError, HANDLER_ERROR};
use crate::rpc::registry::{Handlers, Inbound, Listeners};
use crate::rpc::Method;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Default time a call waits for its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound half of a connection.
pub trait FrameSink: Send + Sync {
    /// Hand one encoded frame to the transport.
    fn send_frame(&self, frame: String) -> Result<()>;
}

impl FrameSink for mpsc::UnboundedSender<String> {
    fn send_frame(&self, frame: String) -> Result<()> {
        self.send(frame).map_err(|_| Error::Disconnected)
    }
}

/// Correlator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcConfig {
    /// How long a call waits for its response; `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

/// A call awaiting its response.
#[derive(Debug)]
pub struct PendingCall {
    pub id: RequestId,
    pub method: Method,
    pub created_at: Instant,
    tx: oneshot::Sender<std::result::Result<Value, RpcError>>,
}

/// Removes the pending entry when the call settles, times out or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestId, PendingCall>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// One end of a JSON-RPC connection.
///
/// `C` is the caller context handed to handlers and listeners with every
/// inbound request (a connection id on the server, the replica on the
/// client).
pub struct RpcPeer<C> {
    sink: Arc<dyn FrameSink>,
    pending: DashMap<RequestId, PendingCall>,
    handlers: Arc<Handlers<C>>,
    listeners: Arc<Listeners<Method, Inbound<C>>>,
    config: RpcConfig,
}

impl<C> fmt::Debug for RpcPeer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcPeer")
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<C: Clone + Send + 'static> RpcPeer<C> {
    /// Create a peer with its own empty registries.
    pub fn new(sink: Arc<dyn FrameSink>, config: RpcConfig) -> Self {
        Self::with_registries(
            sink,
            Arc::new(Handlers::new()),
            Arc::new(Listeners::new()),
            config,
        )
    }

    /// Create a peer sharing registries with other peers.
    pub fn with_registries(
        sink: Arc<dyn FrameSink>,
        handlers: Arc<Handlers<C>>,
        listeners: Arc<Listeners<Method, Inbound<C>>>,
        config: RpcConfig,
    ) -> Self {
        Self {
            sink,
            pending: DashMap::new(),
            handlers,
            listeners,
            config,
        }
    }

    pub fn handlers(&self) -> &Arc<Handlers<C>> {
        &self.handlers
    }

    pub fn listeners(&self) -> &Arc<Listeners<Method, Inbound<C>>> {
        &self.listeners
    }

    /// Number of calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Call `method` on the remote peer and wait for its result.
    pub async fn call(&self, method: Method, params: Vec<Value>) -> Result<Value> {
        let id = next_call_id();
        let started = Instant::now();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            id.clone(),
            PendingCall {
                id: id.clone(),
                method,
                created_at: started,
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        let frame = Request::call(id.clone(), method, params).to_json()?;
        self.sink.send_frame(frame)?;
        tracing::trace!(id = %id, method = %method, "Call sent");

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(id = %id, method = %method, "Call timed out");
                    return Err(timeout_error(method, started));
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(Error::Remote(error)),
            // Entry swept before a response arrived.
            Err(_) => Err(timeout_error(method, started)),
        }
    }

    /// Send a notification. No response is expected.
    pub fn notify(&self, method: Method, params: Vec<Value>) -> Result<()> {
        let frame = Request::notification(method, params).to_json()?;
        self.sink.send_frame(frame)
    }

    /// Process one inbound frame.
    ///
    /// Malformed frames are logged and dropped. Calls are answered from a
    /// spawned task, so this must run inside a tokio runtime.
    pub fn receive(&self, ctx: C, frame: &str) {
        match serde_json::from_str::<Value>(frame) {
            Ok(value) => self.receive_value(ctx, value),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
        }
    }

    fn receive_value(&self, ctx: C, value: Value) {
        match Message::from_value(value) {
            Ok(Message::Batch(items)) => {
                for item in items {
                    self.receive_value(ctx.clone(), item);
                }
            }
            Ok(Message::Request(request)) => self.dispatch(ctx, request),
            Ok(Message::Response(response)) => self.settle(response),
            Err(e) => tracing::warn!(error = %e, "Dropping invalid message"),
        }
    }

    fn dispatch(&self, ctx: C, request: Request) {
        let Some(method) = Method::from_name(&request.method) else {
            match request.id {
                Some(id) => {
                    let error = RpcError::from_handler(&Error::UnknownMethod(request.method));
                    self.respond(Response::failure(id, error));
                }
                None => tracing::debug!(method = %request.method, "Ignoring unknown notification"),
            }
            return;
        };

        let Some(id) = request.id else {
            let inbound = Inbound {
                ctx,
                params: request.params,
            };
            if self.listeners.len(&method) == 0 {
                tracing::debug!(method = %method, "No listener for notification");
            }
            self.listeners.notify(&method, &inbound);
            return;
        };

        let call = self.handlers.invoke(method, ctx, request.params);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let response = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(result)) => Response::success(id, result),
                Ok(Err(e)) => {
                    tracing::warn!(id = %id, method = %method, error = %e, "Call handler failed");
                    Response::failure(id, RpcError::from_handler(&e))
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(id = %id, method = %method, panic = %message, "Call handler panicked");
                    Response::failure(id, RpcError::new(HANDLER_ERROR, message))
                }
            };
            send_response(sink.as_ref(), &response);
        });
    }

    fn respond(&self, response: Response) {
        send_response(self.sink.as_ref(), &response);
    }

    fn settle(&self, response: Response) {
        match self.pending.remove(&response.id) {
            Some((_, call)) => {
                tracing::trace!(
                    id = %call.id,
                    method = %call.method,
                    elapsed_ms = call.created_at.elapsed().as_millis() as u64,
                    "Call settled"
                );
                // The caller may have gone away already.
                let _ = call.tx.send(response.outcome);
            }
            None => tracing::trace!(id = %response.id, "Dropping response for unknown call"),
        }
    }

    /// Drop pending calls older than `max_age`. Their callers fail with a
    /// timeout error. Returns the number of entries removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.created_at.elapsed() >= max_age)
            .map(|entry| entry.key().clone())
            .collect();
        expired
            .iter()
            .filter(|id| self.pending.remove(*id).is_some())
            .count()
    }
}

fn send_response(sink: &dyn FrameSink, response: &Response) {
    let frame = match response.to_json() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(id = %response.id, error = %e, "Failed to encode response");
            return;
        }
    };
    if let Err(e) = sink.send_frame(frame) {
        tracing::warn!(id = %response.id, error = %e, "Failed to send response");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

fn timeout_error(method: Method, started: Instant) -> Error {
    Error::Timeout {
        method: method.name().to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::METHOD_NOT_FOUND;
    use parking_lot::Mutex;
    use serde_json::json;

    type Peer = Arc<RpcPeer<&'static str>>;

    fn pump(mut rx: mpsc::UnboundedReceiver<String>, peer: Peer, ctx: &'static str) {
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                peer.receive(ctx, &frame);
            }
        });
    }

    fn connected_pair() -> (Peer, Peer) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Arc::new(RpcPeer::new(Arc::new(a_tx), RpcConfig::default()));
        let b = Arc::new(RpcPeer::new(Arc::new(b_tx), RpcConfig::default()));
        pump(a_rx, Arc::clone(&b), "from-a");
        pump(b_rx, Arc::clone(&a), "from-b");
        (a, b)
    }

    fn detached(config: RpcConfig) -> (Peer, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RpcPeer::new(Arc::new(tx), config)), rx)
    }

    #[tokio::test]
    async fn call_resolves_with_handler_result() {
        let (a, b) = connected_pair();
        b.handlers().set(Method::Schema, |ctx, params| async move {
            Ok(json!({"ctx": ctx, "params": params}))
        });

        let result = a.call(Method::Schema, vec![json!(1)]).await.unwrap();
        assert_eq!(result, json!({"ctx": "from-a", "params": [1]}));
        assert_eq!(a.pending_count(), 0);
    }

    #[tokio::test]
    async fn missing_handler_rejects_call() {
        let (a, _b) = connected_pair();
        match a.call(Method::Select, vec![]).await {
            Err(Error::Remote(e)) => {
                assert_eq!(e.code, HANDLER_ERROR);
                assert_eq!(e.message, "Unknown handler RTSDB_SELECT");
                assert!(e.data.is_some());
            }
            other => panic!("Expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notifications_reach_listeners_without_response() {
        let (a, b) = connected_pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        b.listeners().add(Method::RecordPut, move |inbound| {
            s.lock().push((inbound.ctx, inbound.params.clone()));
            Ok(())
        });

        a.notify(Method::RecordPut, vec![json!({"x": 1})]).unwrap();
        assert_eq!(a.pending_count(), 0);
        // A call after the notification proves the notification was processed.
        b.handlers().set(Method::Get, |_, _| async { Ok(Value::Null) });
        a.call(Method::Get, vec![]).await.unwrap();

        assert_eq!(*seen.lock(), vec![("from-a", vec![json!({"x": 1})])]);
    }

    async fn exploding_handler(_: &'static str, _: Vec<Value>) -> Result<Value> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panicking_handler_still_answers() {
        let (peer, mut out) = detached(RpcConfig::default());
        peer.handlers().set(Method::Get, exploding_handler);
        peer.receive("x", r#"{"jsonrpc":"2.0","id":1,"method":"RTSDB_GET"}"#);

        let frame = tokio::time::timeout(Duration::from_secs(5), out.recv())
            .await
            .expect("response frame")
            .unwrap();
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["id"], json!(1));
        assert_eq!(frame["error"]["code"], json!(HANDLER_ERROR));
        assert_eq!(frame["error"]["message"], json!("handler panicked: boom"));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn fractional_and_large_ids_are_answered() {
        let (peer, mut out) = detached(RpcConfig::default());
        peer.handlers().set(Method::Get, |_, _| async { Ok(json!("ok")) });

        for id in ["1.5", "18446744073709551615"] {
            let frame = format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"RTSDB_GET","params":[]}}"#);
            peer.receive("x", &frame);
            let reply = tokio::time::timeout(Duration::from_secs(5), out.recv())
                .await
                .expect("response frame")
                .unwrap();
            let reply: Value = serde_json::from_str(&reply).unwrap();
            assert_eq!(reply["id"], serde_json::from_str::<Value>(id).unwrap());
            assert_eq!(reply["result"], json!("ok"));
        }
    }

    #[tokio::test]
    async fn unknown_method_gets_method_not_found() {
        let (peer, mut out) = detached(RpcConfig::default());
        peer.receive("x", r#"{"jsonrpc":"2.0","id":5,"method":"DROP_TABLES","params":[]}"#);
        let frame: Value = serde_json::from_str(&out.recv().await.unwrap()).unwrap();
        assert_eq!(frame["id"], json!(5));
        assert_eq!(frame["error"]["code"], json!(METHOD_NOT_FOUND));

        peer.receive("x", r#"{"jsonrpc":"2.0","method":"DROP_TABLES"}"#);
        peer.receive("x", "not json");
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn batch_elements_dispatch_in_order() {
        let (peer, _out) = detached(RpcConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        peer.listeners().add(Method::RecordAdded, move |inbound| {
            s.lock().push(inbound.params[0].clone());
            Ok(())
        });

        peer.receive(
            "x",
            r#"[{"jsonrpc":"2.0","method":"DB_RECORD_ADD","params":[1]},
                7,
                {"jsonrpc":"2.0","method":"DB_RECORD_ADD","params":[2]}]"#,
        );
        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn response_settles_once_and_unknown_ids_are_dropped() {
        let (peer, mut out) = detached(RpcConfig::default());
        let p = Arc::clone(&peer);
        let call = tokio::spawn(async move { p.call(Method::Get, vec![]).await });

        let frame: Value = serde_json::from_str(&out.recv().await.unwrap()).unwrap();
        let id = frame["id"].clone();

        peer.receive("x", r#"{"jsonrpc":"2.0","id":"nobody","result":1}"#);
        assert_eq!(peer.pending_count(), 1);

        let reply = json!({"jsonrpc": "2.0", "id": id, "result": "first"}).to_string();
        peer.receive("x", &reply);
        let again = json!({"jsonrpc": "2.0", "id": id, "result": "second"}).to_string();
        peer.receive("x", &again);

        assert_eq!(call.await.unwrap().unwrap(), json!("first"));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_pending_entry() {
        let (peer, _out) = detached(RpcConfig {
            call_timeout: Some(Duration::from_secs(1)),
        });
        let err = peer.call(Method::Schema, vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref method, .. } if method == "RTSDB_GET_SCHEMA"));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropped_call_removes_pending_entry() {
        let (peer, mut out) = detached(RpcConfig { call_timeout: None });
        let p = Arc::clone(&peer);
        let call = tokio::spawn(async move { p.call(Method::Get, vec![]).await });

        out.recv().await.unwrap();
        assert_eq!(peer.pending_count(), 1);

        call.abort();
        let _ = call.await;
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn sweep_fails_stale_calls() {
        let (peer, mut out) = detached(RpcConfig { call_timeout: None });
        let p = Arc::clone(&peer);
        let call = tokio::spawn(async move { p.call(Method::Get, vec![]).await });
        out.recv().await.unwrap();

        assert_eq!(peer.sweep_expired(Duration::from_secs(3600)), 0);
        assert_eq!(peer.sweep_expired(Duration::ZERO), 1);
        assert!(matches!(call.await.unwrap(), Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn closed_sink_fails_call() {
        let (peer, out) = detached(RpcConfig::default());
        drop(out);
        assert_eq!(peer.call(Method::Get, vec![]).await, Err(Error::Disconnected));
        assert_eq!(peer.pending_count(), 0);
    }
}
