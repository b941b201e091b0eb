//! End-to-end: request/response transport fallback.
//!
//! When the bidirectional connect fails and fallback is enabled, the
//! coordinator comes up connected on HTTP POST and all calls route there.

use relay_rpc::client::{ClientConfig, ClientError, ConnectionState, RpcClient};
use relay_rpc::protocol::error_codes;
use relay_rpc::server::{handler_fn, MethodOptions, ServerConfig, ServerState};
use relay_test_utils::TestServer;
use serde_json::json;

async fn echo_server() -> TestServer {
    let state = ServerState::new(ServerConfig::default()).await;
    state
        .register(
            "test.echo",
            handler_fn(|params, _| async move { Ok(params.unwrap_or(json!(null))) }),
            MethodOptions::default(),
        )
        .await
        .unwrap();
    TestServer::start(state).await
}

fn fallback_config() -> ClientConfig {
    ClientConfig {
        fallback_to_http: true,
        auto_reconnect: false,
        connection_timeout_ms: 1_000,
        ..ClientConfig::default()
    }
}

/// A websocket endpoint nothing listens on; the connect fails fast.
const DEAD_WS_URL: &str = "ws://127.0.0.1:9/rpc";

#[tokio::test]
async fn failed_ws_connect_falls_back_to_http_transport() {
    let server = echo_server().await;
    let client =
        RpcClient::connect_with_endpoints(DEAD_WS_URL, &server.http_url(), fallback_config())
            .await
            .unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let result = client.call("test.echo", json!({"via": "http"})).await.unwrap();
    assert_eq!(result, json!({"via": "http"}));
}

#[tokio::test]
async fn application_errors_map_identically_over_http() {
    let server = echo_server().await;
    let client =
        RpcClient::connect_with_endpoints(DEAD_WS_URL, &server.http_url(), fallback_config())
            .await
            .unwrap();

    match client.call("test.nope", None).await {
        Err(ClientError::Rpc(error)) => {
            assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
            assert_eq!(error.message, "Method not found: test.nope");
        }
        other => panic!("expected method-not-found, got {other:?}"),
    }
}

#[tokio::test]
async fn batches_work_over_the_fallback_transport() {
    let server = echo_server().await;
    let client =
        RpcClient::connect_with_endpoints(DEAD_WS_URL, &server.http_url(), fallback_config())
            .await
            .unwrap();

    let mut batch = client.batch();
    batch.add("test.echo", Some(json!("a")));
    batch.add("test.echo", Some(json!("b")));
    let response = batch.execute(&client).await.unwrap();
    assert!(response.success);
    assert_eq!(response.responses.len(), 2);
    assert_eq!(response.responses[1].result, Some(json!("b")));
}

#[tokio::test]
async fn without_fallback_a_dead_endpoint_is_a_connect_error() {
    let config = ClientConfig {
        fallback_to_http: false,
        ..fallback_config()
    };
    let result = RpcClient::connect_with_endpoints(DEAD_WS_URL, "http://127.0.0.1:9/rpc", config).await;
    assert!(matches!(
        result,
        Err(ClientError::Connect(_) | ClientError::Timeout(_))
    ));
}
