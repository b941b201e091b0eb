//! Reconnect backoff curve.

use crate::config::ClientConfig;
use std::time::Duration;

/// Delay before reconnect attempt `attempt` (1-based):
/// `base * factor^(attempt-1)`, capped at the configured maximum.
pub fn reconnect_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
    let delay = config.reconnect_delay_ms as f64 * config.backoff_factor.powi(exponent);
    let capped = delay.min(config.max_reconnect_delay_ms as f64);
    Duration::from_millis(capped as u64)
}
