//! End-to-end: unexpected close and automatic reconnection.

use relay_rpc::client::{ClientConfig, ClientEvent, ConnectionState, RpcClient};
use relay_rpc::server::{handler_fn, MethodOptions, ServerConfig, ServerState};
use relay_test_utils::TestServer;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn echo_server() -> (ServerState, TestServer) {
    let state = ServerState::new(ServerConfig::default()).await;
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

fn reconnecting_config() -> ClientConfig {
    ClientConfig {
        fallback_to_http: false,
        auto_reconnect: true,
        reconnect_delay_ms: 100,
        backoff_factor: 2.0,
        max_reconnect_attempts: 5,
        ..ClientConfig::default()
    }
}

async fn wait_for_event(
    events: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
    wanted: &ClientEvent,
) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if event == *wanted {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

#[tokio::test]
async fn calls_issued_while_reconnecting_are_delivered_once_on_reopen() {
    let (state, server) = echo_server().await;
    let client = RpcClient::connect(&server.ws_url(), reconnecting_config())
        .await
        .unwrap();
    let mut events = client.events();

    assert_eq!(client.call("test.echo", json!("before")).await.unwrap(), json!("before"));

    // Server-side close: from the client's view this is unexpected.
    let ids = state.connections.connection_ids().await;
    for id in &ids {
        state.connections.close(id, 1012, "service restart").await;
    }
    wait_for_event(&mut events, &ClientEvent::ReconnectStarted).await;
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    // Issued while reconnecting: queued, then flushed exactly once.
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.call("test.echo", json!("queued")),
    )
    .await
    .expect("queued call should resolve after reconnect")
    .unwrap();
    assert_eq!(result, json!("queued"));

    wait_for_event(&mut events, &ClientEvent::Reconnected).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    client.close().await;
}

#[tokio::test]
async fn subscriptions_survive_a_reconnect() {
    let (state, server) = echo_server().await;
    let client = RpcClient::connect(&server.ws_url(), reconnecting_config())
        .await
        .unwrap();
    let mut events = client.events();

    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_events = seen.clone();
    client
        .subscribe("updates", move |data| {
            seen_events.lock().unwrap().push(data);
        })
        .await
        .unwrap();

    for id in state.connections.connection_ids().await {
        state.connections.close(&id, 1012, "service restart").await;
    }
    wait_for_event(&mut events, &ClientEvent::Reconnected).await;

    // The replayed subscription needs to land server-side first.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let delivered = state
            .connections
            .broadcast("updates", json!("after"), None)
            .await;
        if delivered > 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "resubscribe never landed");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while seen.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "event never arrived");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(seen.lock().unwrap().clone(), vec![json!("after")]);
    client.close().await;
}

#[tokio::test]
async fn reconnect_gives_up_after_the_attempt_cap() {
    let (state, server) = echo_server().await;
    let client = RpcClient::connect(
        &server.ws_url(),
        ClientConfig {
            max_reconnect_attempts: 2,
            reconnect_delay_ms: 50,
            connection_timeout_ms: 500,
            ..reconnecting_config()
        },
    )
    .await
    .unwrap();
    let mut events = client.events();

    // Stop the listener first so every reconnect attempt is refused, then
    // sever the established connection.
    server.stop_accepting();
    for id in state.connections.connection_ids().await {
        state.connections.close(&id, 1012, "gone").await;
    }

    wait_for_event(&mut events, &ClientEvent::ReconnectStarted).await;
    wait_for_event(&mut events, &ClientEvent::ReconnectFailed).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // With reconnection exhausted, new calls fail fast.
    assert!(client.call("test.echo", json!(1)).await.is_err());
    client.close().await;
}
