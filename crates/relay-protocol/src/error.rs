//! Error taxonomy and codec failure type.

use crate::envelope::RpcError;
use serde_json::Value;
use thiserror::Error;

/// Frozen RPC error codes.
///
/// Two disjoint bands: the standard band (`-32700..=-32600`) and the custom
/// band (`-32099..=-32001`).  A numeric code outside these bands is not a
/// valid RPC error.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const UNAUTHORIZED: i64 = -32001;
    pub const FORBIDDEN: i64 = -32002;
    pub const NOT_FOUND: i64 = -32003;
    pub const CONFLICT: i64 = -32004;
    pub const RATE_LIMITED: i64 = -32005;
    pub const TIMEOUT: i64 = -32006;
}

/// True when `code` lies in the standard or custom band.
pub fn is_valid_error_code(code: i64) -> bool {
    (-32700..=-32600).contains(&code) || (-32099..=-32001).contains(&code)
}

/// Classify a JSON value as a well-formed RPC error.
///
/// Requires a numeric in-band `code` and a string `message`.  Fractional
/// codes are rejected.
pub fn is_rpc_error(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let Some(code) = obj.get("code").and_then(Value::as_i64) else {
        return false;
    };
    obj.get("message").is_some_and(Value::is_string) && is_valid_error_code(code)
}

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

/// A codec-level failure: the input could not be decoded as a valid
/// envelope, or a value could not be encoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Input was null, absent, empty, or whitespace-only.
    #[error("empty input")]
    EmptyInput,
    /// Input bytes were not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// Input was not well-formed JSON.
    #[error("invalid JSON: {0}")]
    MalformedJson(String),
    /// Input parsed but is not a valid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Input parsed but is not a valid response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Input parsed but is not a valid batch.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    /// Encoding failed.
    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl ProtocolError {
    /// Shape the failure as the RPC error a server surfaces to the caller.
    pub fn as_rpc_error(&self) -> RpcError {
        match self {
            ProtocolError::EmptyInput
            | ProtocolError::InvalidUtf8(_)
            | ProtocolError::MalformedJson(_) => RpcError::parse_error("invalid JSON"),
            ProtocolError::InvalidRequest(detail) | ProtocolError::InvalidBatch(detail) => {
                RpcError::invalid_request(detail)
            }
            ProtocolError::InvalidResponse(detail) => RpcError::invalid_request(detail),
            ProtocolError::Serialize(detail) => RpcError::internal(detail.clone()),
        }
    }
}
