//! Correlator tests across two connected peers.

use rtdb_engine::{
    Error, EventKind, Method, RecordChange, ReplicationEvent, RpcConfig, RpcPeer,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Peer = Arc<RpcPeer<Side>>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Side {
    Client,
    Server,
}

/// Two peers whose sinks feed each other's `receive`.
fn wire(config: RpcConfig) -> (Peer, Peer) {
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel::<String>();
    let client = Arc::new(RpcPeer::new(Arc::new(client_tx), config));
    let server = Arc::new(RpcPeer::new(Arc::new(server_tx), config));

    let to_server = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            to_server.receive(Side::Client, &frame);
        }
    });
    let to_client = Arc::clone(&client);
    tokio::spawn(async move {
        while let Some(frame) = server_rx.recv().await {
            to_client.receive(Side::Server, &frame);
        }
    });

    (client, server)
}

#[tokio::test]
async fn handler_may_call_back_into_the_caller() {
    let (client, server) = wire(RpcConfig::default());

    client
        .handlers()
        .set(Method::Select, |_, _| async { Ok(json!([{"id": 1}, {"id": 2}])) });

    let back = Arc::clone(&server);
    server.handlers().set(Method::Notify, move |side, _| {
        let back = Arc::clone(&back);
        async move {
            assert_eq!(side, Side::Client);
            let rows = back.call(Method::Select, vec![]).await?;
            Ok(json!(rows.as_array().map_or(0, Vec::len)))
        }
    });

    let pushed = client.call(Method::Notify, vec![json!({})]).await.unwrap();
    assert_eq!(pushed, json!(2));
    assert_eq!(client.pending_count(), 0);
    assert_eq!(server.pending_count(), 0);
}

#[tokio::test]
async fn concurrent_calls_settle_independently() {
    let (client, server) = wire(RpcConfig::default());
    server.handlers().set(Method::Get, |_, params| async move {
        let n = params.first().and_then(Value::as_i64).unwrap_or_default();
        tokio::time::sleep(Duration::from_millis((10 - n as u64) * 2)).await;
        Ok(json!(n * n))
    });

    let calls = (0..10).map(|n| {
        let client = Arc::clone(&client);
        async move { client.call(Method::Get, vec![json!(n)]).await }
    });
    let results = futures::future::join_all(calls).await;

    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!(n * n));
    }
}

#[tokio::test]
async fn handler_errors_come_back_as_remote_errors() {
    let (client, server) = wire(RpcConfig::default());
    server.handlers().set(Method::Get, |_, _| async {
        Err::<Value, _>(Error::CollectionNotFound("ghosts".into()))
    });

    match client.call(Method::Get, vec![]).await {
        Err(Error::Remote(e)) => {
            assert_eq!(e.code, -1);
            assert_eq!(e.message, "collection not found: ghosts");
        }
        other => panic!("Expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn record_notifications_arrive_remote() {
    let (client, server) = wire(RpcConfig::default());
    let received = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    server.listeners().add(Method::RecordPut, move |inbound| {
        let event = ReplicationEvent::from_params(Method::RecordPut, &inbound.params)?;
        sink.lock().push(event);
        Ok(())
    });

    let local = ReplicationEvent::local(
        EventKind::Put,
        RecordChange::new("app", "users").with_record(json!({"id": 1})),
    );
    client.notify(local.method(), local.to_params().unwrap()).unwrap();
    assert_eq!(client.pending_count(), 0);

    // Round-trip a call so the notification is known to be processed.
    server.handlers().set(Method::Get, |_, _| async { Ok(Value::Null) });
    client.call(Method::Get, vec![]).await.unwrap();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].origin, rtdb_engine::Origin::Remote);
    assert_eq!(received[0].change, local.change);
}

#[tokio::test(start_paused = true)]
async fn calls_to_a_silent_peer_time_out() {
    let (tx, _rx) = mpsc::unbounded_channel::<String>();
    let peer: RpcPeer<Side> = RpcPeer::new(
        Arc::new(tx),
        RpcConfig {
            call_timeout: Some(Duration::from_secs(30)),
        },
    );
    let started = tokio::time::Instant::now();
    let err = peer.call(Method::Schema, vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(peer.pending_count(), 0);
}

#[tokio::test]
async fn listener_failures_are_isolated() {
    let (client, server) = wire(RpcConfig::default());
    let hits = Arc::new(AtomicUsize::new(0));

    server
        .listeners()
        .add(Method::RecordDeleted, |_| Err("listener failed".into()));
    let counter = Arc::clone(&hits);
    server.listeners().add(Method::RecordDeleted, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    client.notify(Method::RecordDeleted, vec![json!({})]).unwrap();
    server.handlers().set(Method::Get, |_, _| async { Ok(Value::Null) });
    client.call(Method::Get, vec![]).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
