//! End-to-end: hibernation round-trip.
//!
//! A connection that idles past the timeout hibernates (attachment
//! serialized); events emitted during the idle window are queued and must
//! reach the client before the response to the message that woke the
//! connection.

use relay_rpc::client::{ClientConfig, RpcClient};
use relay_rpc::server::{handler_fn, ConnectionStatus, MethodOptions, ServerConfig, ServerState};
use relay_test_utils::TestServer;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn hibernating_server(idle_ms: u64, queue_limit: usize) -> (ServerState, TestServer) {
    let state = ServerState::new(ServerConfig {
        idle_timeout_ms: idle_ms,
        max_hibernation_ms: 60_000,
        event_queue_limit: queue_limit,
        ..ServerConfig::default()
    })
    .await;
    state
        .register(
            "test.echo",
            handler_fn(|params, _| async move { Ok(params.unwrap_or(json!(null))) }),
            MethodOptions::default(),
        )
        .await
        .unwrap();
    let server = TestServer::start(state.clone()).await;
    (state, server)
}

fn ws_client_config() -> ClientConfig {
    ClientConfig {
        fallback_to_http: false,
        auto_reconnect: false,
        ..ClientConfig::default()
    }
}

async fn sole_connection_id(state: &ServerState) -> String {
    let ids = state.connections.connection_ids().await;
    assert_eq!(ids.len(), 1, "expected exactly one connection");
    ids[0].clone()
}

#[tokio::test]
async fn queued_events_are_delivered_before_the_waking_response() {
    let (state, server) = hibernating_server(150, 10).await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();

    // The log captures delivery order as frames arrive on the client.
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log_events = log.clone();
    client
        .subscribe("updates", move |data| {
            log_events.lock().unwrap().push(format!("event:{data}"));
        })
        .await
        .unwrap();
    let connection_id = sole_connection_id(&state).await;

    // Idle past the timeout; the server hibernates the connection.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        state.connections.status(&connection_id).await,
        Some(ConnectionStatus::Hibernating)
    );

    // Events emitted during the idle window are queued, not sent.
    state.connections.broadcast("updates", json!(1), None).await;
    state.connections.broadcast("updates", json!(2), None).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(log.lock().unwrap().is_empty(), "no delivery while hibernating");

    // The next inbound message wakes the connection; the queue drains
    // first, then the response arrives.
    let result = client.call("test.echo", json!("wake")).await.unwrap();
    log.lock().unwrap().push("response".to_owned());
    assert_eq!(result, json!("wake"));

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, vec!["event:1", "event:2", "response"]);
    assert_eq!(
        state.connections.status(&connection_id).await,
        Some(ConnectionStatus::Open)
    );
    client.close().await;
}

#[tokio::test]
async fn bounded_queue_drops_the_oldest_events() {
    let (state, server) = hibernating_server(150, 3).await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_events = seen.clone();
    client
        .subscribe("updates", move |data| {
            seen_events.lock().unwrap().push(data);
        })
        .await
        .unwrap();
    let connection_id = sole_connection_id(&state).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        state.connections.status(&connection_id).await,
        Some(ConnectionStatus::Hibernating)
    );

    for n in 0..5 {
        state.connections.broadcast("updates", json!(n), None).await;
    }
    client.call("test.echo", json!("wake")).await.unwrap();
    // The waking response arrived, so all replayed events are in too.
    let entries = seen.lock().unwrap().clone();
    assert_eq!(entries, vec![json!(2), json!(3), json!(4)]);
    client.close().await;
}

#[tokio::test]
async fn max_hibernation_expiry_closes_the_server_side_record() {
    let state = ServerState::new(ServerConfig {
        idle_timeout_ms: 100,
        max_hibernation_ms: 300,
        ..ServerConfig::default()
    })
    .await;
    let server = TestServer::start(state.clone()).await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();

    let connection_id = sole_connection_id(&state).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(state.connections.status(&connection_id).await, None);
    assert_eq!(state.connections.count().await, 0);
    client.close().await;
}
