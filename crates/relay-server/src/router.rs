//! Request router: WebSocket upgrades, HTTP POST invocation, CORS.
//!
//! Both transports invoke the same dispatch engine, so functional parity
//! between them is a property of this module, not the engine.

use crate::connection::{HostSocket, SocketClosed};
use crate::discovery;
use crate::handler::RequestContext;
use crate::state::ServerState;
use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, Query, State,
    },
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{
    batch_request_from_value, encode_batch_response, encode_response, request_from_value,
    BatchRequest, BatchResponse, Request, Response, RpcError,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Assemble the axum router for a server state.
///
/// `POST /` is an alias of `POST /{root}`; discovery lives under
/// `GET /{root}` and `GET /{root}/{name}`.
pub fn build_router(state: ServerState) -> Router {
    let root = state.config.root_path.clone();
    Router::new()
        .route("/", post(handle_post).options(preflight))
        .route(
            &format!("/{root}"),
            get(handle_root_get).post(handle_post).options(preflight),
        )
        .route(
            &format!("/{root}/{{name}}"),
            get(discovery::handle_doc_get)
                .post(discovery::handle_doc_post)
                .options(preflight),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// CORS
// ---------------------------------------------------------------------------

pub(crate) fn with_cors(mut response: HttpResponse) -> HttpResponse {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

async fn preflight() -> HttpResponse {
    with_cors(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// A dispatched outcome: a single envelope or a batch envelope.
pub(crate) enum RpcReply {
    Single(Response),
    Batch(BatchResponse),
}

impl RpcReply {
    pub(crate) fn encode(&self) -> String {
        let encoded = match self {
            RpcReply::Single(response) => encode_response(response),
            RpcReply::Batch(batch) => encode_batch_response(batch),
        };
        encoded.unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode reply envelope");
            // The fallback envelope contains no caller data and always encodes.
            r#"{"id":null,"error":{"code":-32603,"message":"Internal error"}}"#.to_owned()
        })
    }

    fn to_json(&self) -> Value {
        let result = match self {
            RpcReply::Single(response) => serde_json::to_value(response),
            RpcReply::Batch(batch) => serde_json::to_value(batch),
        };
        result.unwrap_or_else(|_| {
            serde_json::json!({
                "id": null,
                "error": { "code": -32603, "message": "Internal error" }
            })
        })
    }
}

fn rpc_error_response(status: StatusCode, id: Option<String>, error: RpcError) -> HttpResponse {
    with_cors((status, Json(Response::failure(id, error))).into_response())
}

// ---------------------------------------------------------------------------
// Shared dispatch with per-call timeout
// ---------------------------------------------------------------------------

/// Race the dispatch against the configured per-call timer.
///
/// The spawned handler is not forcibly terminated on expiry; it runs to
/// completion in the background and its eventual result is discarded.
pub(crate) async fn dispatch_with_timeout(
    state: &ServerState,
    request: Request,
    ctx: RequestContext,
) -> Response {
    let id = request.id.clone();
    let timeout = Duration::from_millis(state.config.method_timeout_ms);
    let dispatcher = state.dispatcher.clone();
    let task = tokio::spawn(async move { dispatcher.dispatch(request, ctx).await });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(response)) => response,
        Ok(Err(join_error)) => {
            warn!(id = %id, error = %join_error, "dispatch task failed");
            let message = if state.config.production_mode {
                "Internal error".to_owned()
            } else {
                format!("handler aborted: {join_error}")
            };
            Response::failure(Some(id), RpcError::internal(message))
        }
        Err(_) => Response::failure(
            Some(id),
            RpcError::timeout(format!(
                "Request timed out after {} ms",
                state.config.method_timeout_ms
            )),
        ),
    }
}

pub(crate) async fn dispatch_batch_with_timeout(
    state: &ServerState,
    batch: BatchRequest,
    ctx: RequestContext,
) -> RpcReply {
    let id = batch.id.clone();
    let timeout = Duration::from_millis(state.config.method_timeout_ms);
    let dispatcher = state.dispatcher.clone();
    let task = tokio::spawn(async move { dispatcher.dispatch_batch(batch, ctx).await });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(response))) => RpcReply::Batch(response),
        Ok(Ok(Err(rejection))) => RpcReply::Single(Response::failure(Some(id), rejection)),
        Ok(Err(join_error)) => {
            warn!(id = %id, error = %join_error, "batch dispatch task failed");
            RpcReply::Single(Response::failure(Some(id), RpcError::internal("Internal error")))
        }
        Err(_) => RpcReply::Single(Response::failure(
            Some(id),
            RpcError::timeout(format!(
                "Request timed out after {} ms",
                state.config.method_timeout_ms
            )),
        )),
    }
}

fn best_effort_id(obj: &Map<String, Value>) -> Option<String> {
    obj.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
}

// ---------------------------------------------------------------------------
// HTTP POST
// ---------------------------------------------------------------------------

/// Single or batch invocation over request/response HTTP.
///
/// Preconditions run in a fixed order, each with its own status code;
/// once dispatch runs the status is 200 regardless of the application
/// outcome.
async fn handle_post(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("application/json") {
        return rpc_error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            None,
            RpcError::parse_error("expected application/json content type"),
        );
    }

    if let Some(limiter) = &state.rate_limiter {
        let key = headers
            .get(&state.config.client_id_header)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(crate::rate_limit::ANONYMOUS_CLIENT);
        if !limiter.check(key) {
            debug!(client = %key, "rate limit exceeded");
            return rpc_error_response(
                StatusCode::TOO_MANY_REQUESTS,
                None,
                RpcError::rate_limited("Rate limit exceeded"),
            );
        }
    }

    if body.len() > state.config.max_payload_bytes {
        return rpc_error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            None,
            RpcError::invalid_request(&format!(
                "payload exceeds {} bytes",
                state.config.max_payload_bytes
            )),
        );
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                None,
                RpcError::parse_error("invalid JSON"),
            );
        }
    };
    let Value::Object(obj) = value else {
        return rpc_error_response(
            StatusCode::BAD_REQUEST,
            None,
            RpcError::invalid_request("expected a JSON object"),
        );
    };

    let reply = if obj.contains_key("requests") {
        match batch_request_from_value(obj) {
            Ok(batch) => {
                dispatch_batch_with_timeout(&state, batch, RequestContext::detached()).await
            }
            Err(e) => {
                return rpc_error_response(StatusCode::BAD_REQUEST, None, e.as_rpc_error());
            }
        }
    } else {
        match request_from_value(obj.clone()) {
            Ok(request) => RpcReply::Single(
                dispatch_with_timeout(&state, request, RequestContext::detached()).await,
            ),
            Err(e) => {
                return rpc_error_response(
                    StatusCode::BAD_REQUEST,
                    best_effort_id(&obj),
                    e.as_rpc_error(),
                );
            }
        }
    };
    with_cors((StatusCode::OK, Json(reply.to_json())).into_response())
}

// ---------------------------------------------------------------------------
// GET: WebSocket upgrade or discovery catalog
// ---------------------------------------------------------------------------

/// `WebSocketUpgrade` does not implement `OptionalFromRequestParts`, so it
/// cannot be used as `Option<WebSocketUpgrade>` directly; this wrapper
/// recovers the same "absent if extraction fails" behavior.
struct MaybeWebSocketUpgrade(Option<WebSocketUpgrade>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeWebSocketUpgrade {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(WebSocketUpgrade::from_request_parts(parts, state).await.ok()))
    }
}

async fn handle_root_get(
    State(state): State<ServerState>,
    MaybeWebSocketUpgrade(ws): MaybeWebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> HttpResponse {
    match ws {
        Some(upgrade) => upgrade.on_upgrade(move |socket| serve_socket(socket, state)),
        None => discovery::catalog_response(&state, &headers, &query).await,
    }
}

// ---------------------------------------------------------------------------
// WebSocket connection loop
// ---------------------------------------------------------------------------

enum Outbound {
    Text(String),
    Pong(Bytes),
    Close(u16, String),
}

/// Bridges the connection manager's [`HostSocket`] seam onto an axum
/// WebSocket.  The attachment store is in-memory because this host never
/// evicts the process.
struct AxumSocket {
    tx: mpsc::UnboundedSender<Outbound>,
    attachment: StdMutex<Option<Vec<u8>>>,
}

impl HostSocket for AxumSocket {
    fn send(&self, text: String) -> Result<(), SocketClosed> {
        self.tx.send(Outbound::Text(text)).map_err(|_| SocketClosed)
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close(code, reason.to_owned()));
    }

    fn serialize_attachment(&self, bytes: Vec<u8>) {
        *self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(bytes);
    }

    fn deserialize_attachment(&self) -> Option<Vec<u8>> {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn serve_socket(socket: WebSocket, state: ServerState) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(sender, rx));

    let host_socket = Arc::new(AxumSocket {
        tx: tx.clone(),
        attachment: StdMutex::new(None),
    });
    let connection_id = state.connections.adopt(host_socket).await;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                state.connections.on_inbound(&connection_id).await;
                let state = state.clone();
                let connection_id = connection_id.clone();
                let text = text.to_string();
                tokio::spawn(async move {
                    handle_ws_text(state, connection_id, text).await;
                });
            }
            Ok(Message::Binary(_)) => {
                // Binary frames carry no envelope; drop them.
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Outbound::Pong(data));
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    info!(connection_id = %connection_id, "peer disconnected");
    state
        .connections
        .close(&connection_id, 1000, "peer disconnected")
        .await;
}

async fn write_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Pong(data) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Outbound::Close(code, reason) => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Parse one inbound text frame, dispatch it, and send the reply on the
/// same connection.  All requests on a connection run concurrently;
/// correlation is by id alone.
async fn handle_ws_text(state: ServerState, connection_id: String, text: String) {
    let ctx = RequestContext::for_connection(connection_id.clone(), state.connections.clone());
    let reply = match serde_json::from_str::<Value>(&text) {
        Err(_) => RpcReply::Single(Response::failure(None, RpcError::parse_error("invalid JSON"))),
        Ok(Value::Object(obj)) if obj.contains_key("requests") => {
            match batch_request_from_value(obj) {
                Ok(batch) => dispatch_batch_with_timeout(&state, batch, ctx).await,
                Err(e) => RpcReply::Single(Response::failure(None, e.as_rpc_error())),
            }
        }
        Ok(Value::Object(obj)) => match request_from_value(obj.clone()) {
            Ok(request) => {
                RpcReply::Single(dispatch_with_timeout(&state, request, ctx).await)
            }
            Err(e) => {
                RpcReply::Single(Response::failure(best_effort_id(&obj), e.as_rpc_error()))
            }
        },
        Ok(_) => RpcReply::Single(Response::failure(
            None,
            RpcError::invalid_request("expected a JSON object"),
        )),
    };
    state.connections.send(&connection_id, reply.encode()).await;
}
