//! Client configuration.

/// Knobs for the coordinator.  The defaults suit an interactive client:
/// reconnect automatically with a capped exponential backoff, fall back to
/// request/response HTTP when the bidirectional connect fails.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Canonical path segment appended to the endpoint URL when missing.
    pub root_path: String,
    /// Reconnect on unexpected close.
    pub auto_reconnect: bool,
    /// Give up after this many consecutive failed reconnect attempts.
    pub max_reconnect_attempts: u32,
    /// Base delay of the backoff curve.
    pub reconnect_delay_ms: u64,
    /// Multiplier applied per attempt: `base * factor^(attempt-1)`.
    pub backoff_factor: f64,
    /// Ceiling for a single backoff delay.
    pub max_reconnect_delay_ms: u64,
    /// Deadline for the initial connect (and each reconnect attempt).
    pub connection_timeout_ms: u64,
    /// Per-call deadline.
    pub request_timeout_ms: u64,
    /// Network-failure retries on the request/response transport.
    pub http_retry_limit: u32,
    /// Switch to request/response HTTP when the bidirectional connect
    /// fails.
    pub fallback_to_http: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            root_path: "rpc".to_owned(),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_reconnect_delay_ms: 30_000,
            connection_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            http_retry_limit: 2,
            fallback_to_http: true,
        }
    }
}
