//! Client-side failure taxonomy.
//!
//! Transport-level failures (connect, network, timeout, closed) are a
//! distinct category from application errors: they originate client-side
//! and never carry an RPC error code.  Application errors arrive as
//! [`RpcError`] payloads in the response envelope.

use relay_protocol::{ProtocolError, RpcError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The connection closed (or reconnection gave up) while the request
    /// was outstanding.
    #[error("connection closed")]
    ConnectionClosed,
    /// The client was closed deliberately.
    #[error("client closed")]
    Closed,
    /// The per-request deadline expired.
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    /// The initial connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// A network-level failure on the request/response transport.
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// The peer sent something that is not a valid envelope.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// An application-level error returned by the server.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
