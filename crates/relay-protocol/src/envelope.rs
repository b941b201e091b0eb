//! Wire envelope types.
//!
//! `Option<serde_json::Value>` carries the absent-vs-null distinction:
//! `None` means the key is omitted from the encoded object, while
//! `Some(Value::Null)` is an explicit `null` and is preserved.

use crate::error::is_valid_error_code;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

/// Optional request/response metadata.
///
/// Callers may attach a timestamp, trace identifiers, an opaque auth token
/// and arbitrary headers.  `duration` is filled in by the dispatch engine
/// after the handler completes; callers should leave it unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Opaque authentication token; the framework never inspects it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Handler execution time in milliseconds, set after dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A single RPC request.
///
/// `id` is chosen by the caller and must be a non-empty string.  `params`
/// may be absent, null, or any JSON value — the handler sees exactly what
/// was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>) -> Self {
        Request {
            id: id.into(),
            method: method.into(),
            params: None,
            meta: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// A single RPC response.
///
/// Carries at most one of `result` / `error`.  A response with neither is a
/// void return and is legal.  `id` is `None` only when the server could not
/// recover an id from the inbound bytes (encoded as a literal `null`), or
/// the empty string for unsolicited broadcast events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Response {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Response {
            id: Some(id.into()),
            result: Some(result),
            error: None,
            meta: None,
        }
    }

    pub fn failure(id: Option<String>, error: RpcError) -> Self {
        Response {
            id,
            result: None,
            error: Some(error),
            meta: None,
        }
    }

    /// A response carrying neither `result` nor `error` (void return).
    pub fn void(id: impl Into<String>) -> Self {
        Response {
            id: Some(id.into()),
            result: None,
            error: None,
            meta: None,
        }
    }

    /// Build the unsolicited broadcast envelope for a channel event.
    ///
    /// The empty `id` marks the envelope as a subscription signal; clients
    /// must never match it against a pending request.
    pub fn broadcast(channel: &str, data: Value) -> Self {
        Response {
            id: Some(String::new()),
            result: Some(serde_json::json!({ "channel": channel, "data": data })),
            error: None,
            meta: None,
        }
    }

    /// True when the envelope is an unsolicited broadcast event.
    pub fn is_broadcast(&self) -> bool {
        matches!(&self.id, Some(id) if id.is_empty())
    }
}

// ---------------------------------------------------------------------------
// RpcError
// ---------------------------------------------------------------------------

/// An application-level RPC error.
///
/// `code` must lie in the standard (`-32700..=-32600`) or custom
/// (`-32099..=-32001`) band for the value to classify as an RPC error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        RpcError {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True when the code lies in one of the two reserved bands.
    pub fn has_valid_code(&self) -> bool {
        is_valid_error_code(self.code)
    }

    pub fn parse_error(detail: &str) -> Self {
        RpcError::new(crate::error_codes::PARSE_ERROR, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(detail: &str) -> Self {
        RpcError::new(
            crate::error_codes::INVALID_REQUEST,
            format!("Invalid request: {detail}"),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        RpcError::new(
            crate::error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_params(detail: &str) -> Self {
        RpcError::new(
            crate::error_codes::INVALID_PARAMS,
            format!("Invalid params: {detail}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RpcError::new(crate::error_codes::INTERNAL_ERROR, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        RpcError::new(crate::error_codes::RATE_LIMITED, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        RpcError::new(crate::error_codes::TIMEOUT, message)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// A batch of requests executed as one round-trip.
///
/// `abort_on_error = Some(true)` switches from parallel execution to
/// sequential execution that stops at the first member error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub id: String,
    pub requests: Vec<Request>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_on_error: Option<bool>,
}

impl BatchRequest {
    pub fn aborts_on_error(&self) -> bool {
        self.abort_on_error.unwrap_or(false)
    }
}

/// The response to a [`BatchRequest`].
///
/// `responses` is in request order.  With `abort_on_error` it may be shorter
/// than the request array.  `success` is true iff no member carries an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub id: String,
    pub responses: Vec<Response>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}
