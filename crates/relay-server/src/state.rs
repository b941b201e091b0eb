//! Shared server state: configuration, registry, dispatcher, connections.

use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::dispatch::Dispatcher;
use crate::handler::{handler_fn, HandlerError, MethodHandler, Middleware, RequestContext};
use crate::rate_limit::RateLimiter;
use crate::registry::{MethodOptions, MethodRegistry, RegistryError};
use relay_protocol::{error_codes, RpcError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Everything the request router and the connection loops share.
///
/// The registry is written during setup (method registration happens
/// before traffic is accepted) and read concurrently afterwards.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<MethodRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub connections: Arc<ConnectionManager>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl ServerState {
    pub async fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(MethodRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            config.max_batch_size,
            config.production_mode,
        ));
        let connections = Arc::new(ConnectionManager::new(config.clone()));
        let rate_limiter = config.rate_limit.map(|rl| Arc::new(RateLimiter::new(rl)));
        let state = ServerState {
            config,
            registry,
            dispatcher,
            connections,
            rate_limiter,
        };
        state.register_builtins().await;
        state
    }

    /// Register a method on the server.
    pub async fn register(
        &self,
        name: impl Into<String>,
        handler: MethodHandler,
        options: MethodOptions,
    ) -> Result<(), RegistryError> {
        self.registry.register(name, handler, options).await
    }

    /// Append an interceptor to the middleware chain.
    pub async fn use_middleware(&self, mw: Middleware) {
        self.registry.use_middleware(mw).await;
    }

    /// Built-in channel management and liveness methods.
    ///
    /// These ride the normal dispatch path so user middleware sees them.
    async fn register_builtins(&self) {
        let root = self.config.root_path.clone();

        let subscribe = handler_fn(|params, ctx: RequestContext| async move {
            let channel = required_channel(params.as_ref())?;
            let (id, connections) = connection_scope(&ctx)?;
            connections.subscribe(&id, &channel).await;
            Ok(json!({ "subscribed": channel }))
        });
        let unsubscribe = handler_fn(|params, ctx: RequestContext| async move {
            let channel = required_channel(params.as_ref())?;
            let (id, connections) = connection_scope(&ctx)?;
            connections.unsubscribe(&id, &channel).await;
            Ok(json!({ "unsubscribed": channel }))
        });
        let ping = handler_fn(|_, _| async move { Ok(json!("pong")) });

        let builtins: [(String, MethodHandler, &str); 3] = [
            (
                format!("{root}.subscribe"),
                subscribe,
                "Subscribe the calling connection to a broadcast channel",
            ),
            (
                format!("{root}.unsubscribe"),
                unsubscribe,
                "Remove the calling connection from a broadcast channel",
            ),
            (format!("{root}.ping"), ping, "Liveness probe"),
        ];
        for (name, handler, description) in builtins {
            let options = MethodOptions {
                description: Some(description.to_owned()),
                ..MethodOptions::default()
            };
            if let Err(e) = self.registry.register(name, handler, options).await {
                warn!(error = %e, "failed to register builtin method");
            }
        }
    }
}

fn required_channel(params: Option<&Value>) -> Result<String, HandlerError> {
    params
        .and_then(|p| p.get("channel"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| HandlerError::Rpc(RpcError::invalid_params("channel is required")))
}

fn connection_scope(
    ctx: &RequestContext,
) -> Result<(String, Arc<ConnectionManager>), HandlerError> {
    match (ctx.connection_id(), ctx.connections()) {
        (Some(id), Some(connections)) => Ok((id.to_owned(), connections.clone())),
        _ => Err(HandlerError::Rpc(RpcError::new(
            error_codes::FORBIDDEN,
            "subscriptions require a bidirectional connection",
        ))),
    }
}
