//! Request/response fallback transport.

use crate::config::ClientConfig;
use crate::error::ClientError;
use relay_protocol::RpcError;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// POST one serialized envelope and return the parsed reply envelope.
///
/// Network failures retry up to the configured limit; a per-request
/// timeout rejects without retrying; a non-2xx reply with a JSON error
/// body is surfaced as the server-shaped error.
pub(crate) async fn post_envelope(
    http: &reqwest::Client,
    url: &str,
    config: &ClientConfig,
    body: String,
) -> Result<Value, ClientError> {
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let mut last_error = ClientError::Network("request not attempted".to_owned());

    for attempt in 0..=config.http_retry_limit {
        let result = http
            .post(url)
            .header("content-type", "application/json")
            .body(body.clone())
            .timeout(timeout)
            .send()
            .await;
        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(ClientError::Timeout(config.request_timeout_ms));
            }
            Err(e) => {
                debug!(attempt, error = %e, "http transport failure, retrying");
                last_error = ClientError::Network(e.to_string());
                continue;
            }
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                last_error = ClientError::Network(e.to_string());
                continue;
            }
        };

        if status.is_success() {
            return serde_json::from_slice::<Value>(&bytes)
                .map_err(|e| ClientError::Protocol(format!("unparseable reply: {e}")));
        }

        // Transport-level rejection; prefer the server's own error shape
        // when the body carries one.
        if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
            if let Some(error) = value.get("error") {
                if let (Some(code), Some(message)) = (
                    error.get("code").and_then(Value::as_i64),
                    error.get("message").and_then(Value::as_str),
                ) {
                    return Err(ClientError::Rpc(RpcError {
                        code,
                        message: message.to_owned(),
                        data: error.get("data").cloned(),
                    }));
                }
            }
        }
        return Err(ClientError::Network(format!("HTTP {status}")));
    }
    Err(last_error)
}
