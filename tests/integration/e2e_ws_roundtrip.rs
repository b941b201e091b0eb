//! End-to-end: request/response over the bidirectional transport.
//!
//! An in-process server and a real client exercise correlation by id,
//! application errors, and batch semantics over one WebSocket.

use relay_rpc::client::{ClientConfig, ClientError, RpcClient};
use relay_rpc::protocol::error_codes;
use relay_rpc::server::{handler_fn, HandlerError, MethodOptions, ServerConfig, ServerState};
use relay_test_utils::TestServer;
use serde_json::json;
use std::time::Duration;

async fn test_server() -> (ServerState, TestServer) {
    let state = ServerState::new(ServerConfig::default()).await;
    state
        .register(
            "test.echo",
            handler_fn(|params, _| async move { Ok(params.unwrap_or(json!(null))) }),
            MethodOptions::default(),
        )
        .await
        .unwrap();
    state
        .register(
            "test.slow",
            handler_fn(|params, _| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(params.unwrap_or(json!("slow")))
            }),
            MethodOptions::default(),
        )
        .await
        .unwrap();
    state
        .register(
            "test.fail",
            handler_fn(|_, _| async move {
                Err(HandlerError::Rpc(
                    relay_rpc::protocol::RpcError::new(error_codes::NOT_FOUND, "no such thing"),
                ))
            }),
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
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn calls_resolve_by_id_independent_of_response_order() {
    let (_state, server) = test_server().await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();

    // The slow call is issued first but resolves last; both must carry
    // their own payloads.
    let slow = client.call("test.slow", json!("tortoise"));
    let fast = client.call("test.echo", json!("hare"));
    let (slow_result, fast_result) = tokio::join!(slow, fast);

    assert_eq!(slow_result.unwrap(), json!("tortoise"));
    assert_eq!(fast_result.unwrap(), json!("hare"));
    client.close().await;
}

#[tokio::test]
async fn application_errors_surface_with_their_code() {
    let (_state, server) = test_server().await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();

    match client.call("test.fail", None).await {
        Err(ClientError::Rpc(error)) => {
            assert_eq!(error.code, error_codes::NOT_FOUND);
            assert_eq!(error.message, "no such thing");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }

    match client.call("test.missing", None).await {
        Err(ClientError::Rpc(error)) => {
            assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
            assert_eq!(error.message, "Method not found: test.missing");
        }
        other => panic!("expected method-not-found, got {other:?}"),
    }
    client.close().await;
}

#[tokio::test]
async fn batches_over_websocket_preserve_order() {
    let (_state, server) = test_server().await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();

    let mut batch = client.batch();
    batch.add("test.echo", Some(json!(1)));
    batch.add("test.fail", None);
    batch.add("test.echo", Some(json!(3)));
    let response = batch.execute(&client).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.responses.len(), 3);
    assert_eq!(response.responses[0].result, Some(json!(1)));
    assert_eq!(
        response.responses[1].error.as_ref().unwrap().code,
        error_codes::NOT_FOUND
    );
    assert_eq!(response.responses[2].result, Some(json!(3)));
    client.close().await;
}

#[tokio::test]
async fn pipeline_carries_ref_markers_to_the_server() {
    let (_state, server) = test_server().await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();

    let mut batch = client.batch();
    let first = batch.add("test.echo", Some(json!({"name": "a"})));
    batch.add_ref("test.echo", first);
    let results = batch.pipeline(&client).await.unwrap();

    // The echo handler reflects the marker back untouched: the server may
    // inline or reject it, this one passes it through.
    assert_eq!(results, vec![json!({"name": "a"}), json!({"$ref": 0})]);
    client.close().await;
}

#[tokio::test]
async fn builtin_ping_answers_on_the_bidirectional_path() {
    let (_state, server) = test_server().await;
    let client = RpcClient::connect(&server.ws_url(), ws_client_config())
        .await
        .unwrap();
    assert_eq!(client.call("rpc.ping", None).await.unwrap(), json!("pong"));
    client.close().await;
}
