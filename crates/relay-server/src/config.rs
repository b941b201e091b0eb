//! Server configuration loading.
//!
//! Every option has a default; a TOML file can override any subset.
//!
//! # Example
//! ```toml
//! root_path = "rpc"
//! idle_timeout_ms = 30000
//! max_hibernation_ms = 3600000
//!
//! [rate_limit]
//! max = 100
//! window_ms = 60000
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Fixed-window rate limit budget: `max` requests per `window_ms` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max: u32,
    pub window_ms: u64,
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// URL path segment and method-name root token, without slashes.
    pub root_path: String,
    /// Delay from the last inbound message to hibernation.
    pub idle_timeout_ms: u64,
    /// Upper bound on hibernating duration before forced close.
    pub max_hibernation_ms: u64,
    /// Batches with more members are rejected with an invalid-request error.
    pub max_batch_size: usize,
    /// POST bodies larger than this are rejected with HTTP 413.
    pub max_payload_bytes: usize,
    /// Per-call upper bound; expiry yields a timeout error response.
    pub method_timeout_ms: u64,
    /// Per-client fixed-window budget; `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
    /// Header used as the per-client rate-limit key.
    pub client_id_header: String,
    /// Bound on the per-connection queue of events captured while
    /// hibernating; enqueue past the bound drops the oldest event.
    pub event_queue_limit: usize,
    /// When true, internal error detail is collapsed to a generic message.
    pub production_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            root_path: "rpc".to_owned(),
            idle_timeout_ms: 30_000,
            max_hibernation_ms: 3_600_000,
            max_batch_size: 50,
            max_payload_bytes: 1_048_576,
            method_timeout_ms: 30_000,
            rate_limit: None,
            client_id_header: "x-client-id".to_owned(),
            event_queue_limit: 100,
            production_mode: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file, applying defaults for any
    /// omitted field.
    pub fn load(path: impl AsRef<Path>) -> Result<ServerConfig, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<ServerConfig, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        raw.validate()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    root_path: Option<String>,
    idle_timeout_ms: Option<u64>,
    max_hibernation_ms: Option<u64>,
    max_batch_size: Option<usize>,
    max_payload_bytes: Option<usize>,
    method_timeout_ms: Option<u64>,
    rate_limit: Option<RawRateLimit>,
    client_id_header: Option<String>,
    event_queue_limit: Option<usize>,
    production_mode: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    max: Option<u32>,
    window_ms: Option<u64>,
}

impl RawConfig {
    fn validate(self) -> Result<ServerConfig, ConfigError> {
        let defaults = ServerConfig::default();

        let root_path = self.root_path.unwrap_or(defaults.root_path);
        if root_path.is_empty() || root_path.contains('/') || root_path.contains("..") {
            return Err(ConfigError::Invalid(format!(
                "root_path must be a single path segment, got {root_path:?}"
            )));
        }

        let config = ServerConfig {
            root_path,
            idle_timeout_ms: require_positive("idle_timeout_ms", self.idle_timeout_ms, defaults.idle_timeout_ms)?,
            max_hibernation_ms: require_positive("max_hibernation_ms", self.max_hibernation_ms, defaults.max_hibernation_ms)?,
            max_batch_size: require_positive("max_batch_size", self.max_batch_size.map(|v| v as u64), defaults.max_batch_size as u64)? as usize,
            max_payload_bytes: require_positive("max_payload_bytes", self.max_payload_bytes.map(|v| v as u64), defaults.max_payload_bytes as u64)? as usize,
            method_timeout_ms: require_positive("method_timeout_ms", self.method_timeout_ms, defaults.method_timeout_ms)?,
            rate_limit: match self.rate_limit {
                None => None,
                Some(raw) => {
                    let max = raw.max.ok_or_else(|| {
                        ConfigError::Invalid("rate_limit.max is required".into())
                    })?;
                    let window_ms = raw.window_ms.ok_or_else(|| {
                        ConfigError::Invalid("rate_limit.window_ms is required".into())
                    })?;
                    if max == 0 || window_ms == 0 {
                        return Err(ConfigError::Invalid(
                            "rate_limit.max and rate_limit.window_ms must be positive".into(),
                        ));
                    }
                    Some(RateLimitConfig { max, window_ms })
                }
            },
            client_id_header: self.client_id_header.unwrap_or(defaults.client_id_header),
            event_queue_limit: require_positive("event_queue_limit", self.event_queue_limit.map(|v| v as u64), defaults.event_queue_limit as u64)? as usize,
            production_mode: self.production_mode.unwrap_or(defaults.production_mode),
        };
        Ok(config)
    }
}

fn require_positive(name: &str, value: Option<u64>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::Invalid(format!("{name} must be positive"))),
        Some(v) => Ok(v),
    }
}
