//! Validating decode/encode for the four envelope shapes.
//!
//! Decoders accept a UTF-8 string or a raw byte buffer.  Validation is
//! strict on requests (non-empty string `id`, string `method`) and
//! deliberately looser on responses: a missing or null response id is
//! accepted (best-effort ids on server-shaped errors), the empty string id
//! is accepted (broadcast events), and a response carrying neither `result`
//! nor `error` is a legal void return.

use crate::envelope::{BatchRequest, BatchResponse, Meta, Request, Response, RpcError};
use crate::error::ProtocolError;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub fn decode_request(input: &str) -> Result<Request, ProtocolError> {
    request_from_value(parse_object(input)?)
}

pub fn decode_request_bytes(input: &[u8]) -> Result<Request, ProtocolError> {
    decode_request(std::str::from_utf8(input)?)
}

pub fn decode_response(input: &str) -> Result<Response, ProtocolError> {
    response_from_value(parse_object(input)?)
}

pub fn decode_response_bytes(input: &[u8]) -> Result<Response, ProtocolError> {
    decode_response(std::str::from_utf8(input)?)
}

pub fn decode_batch_request(input: &str) -> Result<BatchRequest, ProtocolError> {
    batch_request_from_value(parse_object(input)?)
}

pub fn decode_batch_request_bytes(input: &[u8]) -> Result<BatchRequest, ProtocolError> {
    decode_batch_request(std::str::from_utf8(input)?)
}

pub fn decode_batch_response(input: &str) -> Result<BatchResponse, ProtocolError> {
    batch_response_from_value(parse_object(input)?)
}

pub fn decode_batch_response_bytes(input: &[u8]) -> Result<BatchResponse, ProtocolError> {
    decode_batch_response(std::str::from_utf8(input)?)
}

pub fn encode_request(request: &Request) -> Result<String, ProtocolError> {
    to_json(request)
}

pub fn encode_response(response: &Response) -> Result<String, ProtocolError> {
    to_json(response)
}

pub fn encode_batch_request(batch: &BatchRequest) -> Result<String, ProtocolError> {
    to_json(batch)
}

pub fn encode_batch_response(batch: &BatchResponse) -> Result<String, ProtocolError> {
    to_json(batch)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

// ---------------------------------------------------------------------------
// Shared parsing
// ---------------------------------------------------------------------------

fn parse_object(input: &str) -> Result<Map<String, Value>, ProtocolError> {
    if input.trim().is_empty() {
        return Err(ProtocolError::EmptyInput);
    }
    let value: Value =
        serde_json::from_str(input).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::MalformedJson(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn meta_from_value(
    value: Option<&Value>,
    reject: impl Fn(String) -> ProtocolError,
) -> Result<Option<Meta>, ProtocolError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| reject(format!("malformed meta: {e}"))),
        Some(other) => Err(reject(format!(
            "meta must be an object, got {}",
            json_type_name(other)
        ))),
    }
}

// ---------------------------------------------------------------------------
// Value-level builders (used by servers that parse once and branch)
// ---------------------------------------------------------------------------

/// Validate and build a [`Request`] from an already-parsed JSON object.
pub fn request_from_value(obj: Map<String, Value>) -> Result<Request, ProtocolError> {
    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) => {
            return Err(ProtocolError::InvalidRequest("id must not be empty".into()));
        }
        Some(_) => {
            return Err(ProtocolError::InvalidRequest("id must be a string".into()));
        }
        None => return Err(ProtocolError::InvalidRequest("missing id".into())),
    };
    let method = match obj.get("method") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) => {
            return Err(ProtocolError::InvalidRequest("method must not be empty".into()));
        }
        Some(_) => {
            return Err(ProtocolError::InvalidRequest("method must be a string".into()));
        }
        None => return Err(ProtocolError::InvalidRequest("missing method".into())),
    };
    // Key presence matters: an explicit null params survives as Some(Null).
    let params = obj.get("params").cloned();
    let meta = meta_from_value(obj.get("meta"), ProtocolError::InvalidRequest)?;
    Ok(Request {
        id,
        method,
        params,
        meta,
    })
}

/// Validate and build a [`Response`] from an already-parsed JSON object.
pub fn response_from_value(obj: Map<String, Value>) -> Result<Response, ProtocolError> {
    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(ProtocolError::InvalidResponse(format!(
                "id must be a string or null, got {}",
                json_type_name(other)
            )));
        }
    };
    let result = obj.get("result").cloned();
    let error = match obj.get("error") {
        None => None,
        Some(v) => Some(rpc_error_from_value(v)?),
    };
    if result.is_some() && error.is_some() {
        return Err(ProtocolError::InvalidResponse(
            "response must not carry both result and error".into(),
        ));
    }
    let meta = meta_from_value(obj.get("meta"), ProtocolError::InvalidResponse)?;
    Ok(Response {
        id,
        result,
        error,
        meta,
    })
}

fn rpc_error_from_value(value: &Value) -> Result<RpcError, ProtocolError> {
    let Some(obj) = value.as_object() else {
        return Err(ProtocolError::InvalidResponse("error must be an object".into()));
    };
    let Some(code) = obj.get("code").and_then(Value::as_i64) else {
        return Err(ProtocolError::InvalidResponse(
            "error code must be numeric".into(),
        ));
    };
    let Some(message) = obj.get("message").and_then(Value::as_str) else {
        return Err(ProtocolError::InvalidResponse(
            "error message must be a string".into(),
        ));
    };
    Ok(RpcError {
        code,
        message: message.to_owned(),
        data: obj.get("data").cloned(),
    })
}

/// Validate and build a [`BatchRequest`] from an already-parsed JSON object.
pub fn batch_request_from_value(obj: Map<String, Value>) -> Result<BatchRequest, ProtocolError> {
    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(_) => {
            return Err(ProtocolError::InvalidBatch(
                "batch id must be a non-empty string".into(),
            ));
        }
        None => return Err(ProtocolError::InvalidBatch("missing batch id".into())),
    };
    let requests = match obj.get("requests") {
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => request_from_value(map.clone()),
                other => Err(ProtocolError::InvalidBatch(format!(
                    "batch member must be an object, got {}",
                    json_type_name(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Array(_)) => {
            return Err(ProtocolError::InvalidBatch("requests must not be empty".into()));
        }
        Some(_) => {
            return Err(ProtocolError::InvalidBatch("requests must be an array".into()));
        }
        None => return Err(ProtocolError::InvalidBatch("missing requests".into())),
    };
    let abort_on_error = match obj.get("abortOnError") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(other) => {
            return Err(ProtocolError::InvalidBatch(format!(
                "abortOnError must be a boolean, got {}",
                json_type_name(other)
            )));
        }
    };
    Ok(BatchRequest {
        id,
        requests,
        abort_on_error,
    })
}

/// Validate and build a [`BatchResponse`] from an already-parsed JSON object.
pub fn batch_response_from_value(obj: Map<String, Value>) -> Result<BatchResponse, ProtocolError> {
    let id = match obj.get("id") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(ProtocolError::InvalidBatch("missing batch id".into())),
    };
    let responses = match obj.get("responses") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => response_from_value(map.clone()),
                other => Err(ProtocolError::InvalidBatch(format!(
                    "batch member must be an object, got {}",
                    json_type_name(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ProtocolError::InvalidBatch("responses must be an array".into()));
        }
        None => return Err(ProtocolError::InvalidBatch("missing responses".into())),
    };
    let success = match obj.get("success") {
        Some(Value::Bool(flag)) => *flag,
        _ => {
            return Err(ProtocolError::InvalidBatch("success must be a boolean".into()));
        }
    };
    let duration = match obj.get("duration") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_u64() {
            Some(ms) => Some(ms),
            None => {
                return Err(ProtocolError::InvalidBatch(
                    "duration must be a non-negative number".into(),
                ));
            }
        },
    };
    Ok(BatchResponse {
        id,
        responses,
        success,
        duration,
    })
}
