//! Attachment round-trip across simulated process eviction.
//!
//! A hibernated connection's authoritative record must be rebuildable
//! from nothing but the socket attachment, because the hosting runtime
//! may evict the process while the connection sleeps.

use relay_server::{ConnectionManager, ConnectionStatus, ServerConfig};
use relay_test_utils::MockSocket;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn manager(idle_ms: u64) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(Arc::new(ServerConfig {
        idle_timeout_ms: idle_ms,
        max_hibernation_ms: 600_000,
        ..ServerConfig::default()
    })))
}

#[tokio::test(start_paused = true)]
async fn a_new_process_rebuilds_the_connection_from_the_attachment() {
    let before_eviction = manager(100);
    let socket = MockSocket::new();
    let id = before_eviction.adopt(socket.clone()).await;
    before_eviction.subscribe(&id, "jobs").await;
    before_eviction.set_data(&id, "tenant", json!("t-9")).await;

    // Idle into hibernation; the attachment lands on the socket.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        before_eviction.status(&id).await,
        Some(ConnectionStatus::Hibernating)
    );
    assert!(socket.stored_attachment().is_some());

    // Process eviction: a fresh manager knows nothing, but the host hands
    // back the same socket with its attachment on the next inbound
    // message.
    let after_eviction = manager(100);
    let revived = after_eviction.adopt(socket.clone()).await;
    assert_eq!(revived, id, "identity is stable across eviction");

    let info = after_eviction.info(&id).await.unwrap();
    assert_eq!(info.status, ConnectionStatus::Open);
    assert_eq!(info.subscriptions, vec!["jobs".to_owned()]);
    assert_eq!(info.data.get("tenant"), Some(&json!("t-9")));

    // The rebuilt record participates in broadcasts immediately.
    let delivered = after_eviction.broadcast("jobs", json!("hello"), None).await;
    assert_eq!(delivered, 1);
    assert!(socket.sent().iter().any(|frame| frame.contains("hello")));
}

#[tokio::test(start_paused = true)]
async fn adopting_a_known_attachment_reconciles_the_existing_record() {
    let manager = manager(100);
    let socket = MockSocket::new();
    let id = manager.adopt(socket.clone()).await;
    manager.subscribe(&id, "jobs").await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    manager.broadcast("jobs", json!(1), None).await;

    // The host re-presents the same socket (wake): the in-memory record
    // still exists and must be reconciled, with the queue replayed.
    let revived = manager.adopt(socket.clone()).await;
    assert_eq!(revived, id);
    assert_eq!(manager.status(&id).await, Some(ConnectionStatus::Open));
    assert_eq!(manager.count().await, 1, "no duplicate record");
    assert!(socket.sent().iter().any(|frame| frame.contains("\"data\":1")));
}

#[tokio::test(start_paused = true)]
async fn hibernating_sockets_receive_nothing_until_wake() {
    let manager = manager(100);
    let socket = MockSocket::new();
    let id = manager.adopt(socket.clone()).await;
    manager.subscribe(&id, "jobs").await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let sent_before = socket.sent().len();
    manager.broadcast("jobs", json!("queued"), None).await;
    manager.send(&id, "direct".to_owned()).await;
    assert_eq!(socket.sent().len(), sent_before, "no writes while hibernating");

    manager.on_inbound(&id).await;
    let frames = socket.sent();
    assert!(frames.iter().any(|f| f.contains("queued")));
    assert!(frames.iter().any(|f| f == "direct"));
}
