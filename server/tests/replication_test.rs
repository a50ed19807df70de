//! End-to-end replication between clients through an in-process server.

use rtdb_client::{ClientConfig, MemoryConnector, MemoryListener, MemorySchemaCache, RealtimeDbClient};
use rtdb_engine::{
    CollectionSchema, Comparator, DbSchema, EventKind, FilterTerm, Key, MemoryStoreFactory, Query, RecordChange,
    ReplicationEvent, RpcConfig,
};
use rtdb_server::db::MemoryDocumentStore;
use rtdb_server::RealtimeDbServer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn schemas() -> Vec<DbSchema> {
    vec![DbSchema::new("app")
        .with_collection(CollectionSchema::new("users").with_key_path("id"))
        .with_collection(CollectionSchema::new("notes"))]
}

/// Test helper: serve every connection made through `listener`.
fn serve(server: &Arc<RealtimeDbServer>, mut listener: MemoryListener) {
    let server = Arc::clone(server);
    tokio::spawn(async move {
        while let Some(end) = listener.accept().await {
            tokio::spawn(Arc::clone(&server).serve_frames(end.incoming, end.outgoing));
        }
    });
}

async fn client(server: &Arc<RealtimeDbServer>) -> Arc<RealtimeDbClient> {
    let (connector, listener) = MemoryConnector::new();
    serve(server, listener);
    let (_online_tx, online) = watch::channel(true);
    let client = RealtimeDbClient::connect(
        Arc::new(connector),
        online,
        Arc::new(MemoryStoreFactory::new()),
        Arc::new(MemorySchemaCache::new()),
        ClientConfig::default(),
    )
    .await
    .unwrap();

    let mut changes = client.schema_changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|generation| *generation > 0))
        .await
        .expect("schema handshake")
        .unwrap();
    client
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[cfg(test)]
mod replication_tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_writes_fan_out_to_other_clients_and_the_store() {
        let store = Arc::new(MemoryDocumentStore::new());
        let server = RealtimeDbServer::new(schemas(), store.clone(), RpcConfig::default());
        let alice = client(&server).await;
        let bob = client(&server).await;
        eventually(|| server.connections().connection_count() == 2).await;

        let alice_events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&alice_events);
        alice.database("app").unwrap().events().add(EventKind::Put, move |event: &ReplicationEvent| {
            sink.lock().push(event.origin);
            Ok(())
        });

        let users = alice.collection("app", "users").unwrap();
        users.put(json!({"id": 1, "name": "Ada"}), None).await.unwrap();

        // Bob receives it, the store keeps it.
        let bob_users = bob.collection("app", "users").unwrap();
        let reader = Arc::clone(&bob_users);
        eventually(move || futures::executor::block_on(reader.get(&Key::Int(1))).unwrap().is_some()).await;
        let stored = Arc::clone(&store);
        eventually(move || stored.get("app/users", &Key::Int(1)).is_some()).await;

        // Alice saw only her own local write; nothing was echoed back.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*alice_events.lock(), vec![rtdb_engine::Origin::Local]);

        // Bob's delete reaches Alice and the store.
        bob_users.delete(&Key::Int(1)).await.unwrap();
        let reader = Arc::clone(&users);
        eventually(move || futures::executor::block_on(reader.count(None)).unwrap() == 0).await;
        let stored = Arc::clone(&store);
        eventually(move || stored.len("app/users") == 0).await;

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn test_snapshot_pushes_matching_rows() {
        let store = Arc::new(MemoryDocumentStore::new());
        let server = RealtimeDbServer::new(schemas(), store.clone(), RpcConfig::default());
        let db = server.database("app").unwrap();
        for (id, age) in [(1, 30), (2, 12), (3, 45)] {
            let change = RecordChange::new("app", "users").with_record(json!({"id": id, "age": age}));
            db.apply(EventKind::Put, &change).await.unwrap();
        }

        let reader = client(&server).await;
        let query = Query::new("app", "users").with_filter(FilterTerm::new("age", Comparator::Ge, 18));
        assert_eq!(reader.request_snapshot(&query).await.unwrap(), 2);

        let users = reader.collection("app", "users").unwrap();
        let local = Arc::clone(&users);
        eventually(move || futures::executor::block_on(local.count(None)).unwrap() == 2).await;
        assert!(users.get(&Key::Int(2)).await.unwrap().is_none());

        reader.close().await;
    }

    #[tokio::test]
    async fn test_out_of_line_keys_travel_with_the_change() {
        let store = Arc::new(MemoryDocumentStore::new());
        let server = RealtimeDbServer::new(schemas(), store.clone(), RpcConfig::default());
        let writer = client(&server).await;

        let notes = writer.collection("app", "notes").unwrap();
        notes.add(json!({"text": "hello"}), Some(Key::from("n1"))).await.unwrap();

        let stored = Arc::clone(&store);
        eventually(move || stored.len("app/notes") == 1).await;
        assert_eq!(store.get("app/notes", &Key::from("n1")), Some(json!({"text": "hello"})));

        writer.close().await;
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let server = RealtimeDbServer::new(schemas(), Arc::new(MemoryDocumentStore::new()), RpcConfig::default());
        let reader = client(&server).await;
        eventually(|| server.connections().connection_count() == 1).await;

        reader.close().await;
        eventually(|| server.connections().connection_count() == 0).await;
    }
}
