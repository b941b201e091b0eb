// relay-server: schema-free RPC server core.
//
// The dispatch engine is transport-neutral; the router exposes it over
// WebSocket upgrades and request/response HTTP on the same canonical path,
// and the connection manager keeps per-connection state alive across idle
// hibernation.

pub mod config;
pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod handler;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod state;

pub use config::{ConfigError, RateLimitConfig, ServerConfig};
pub use connection::{
    Attachment, ConnectionInfo, ConnectionManager, ConnectionStatus, HostSocket, SocketClosed,
};
pub use dispatch::Dispatcher;
pub use handler::{
    handler_fn, middleware_fn, HandlerError, HandlerResult, MethodHandler, Middleware, Next,
    RequestContext,
};
pub use rate_limit::RateLimiter;
pub use registry::{MethodEntry, MethodOptions, MethodRegistry, ParamKind, ParamSpec, RegistryError};
pub use router::build_router;
pub use state::ServerState;
