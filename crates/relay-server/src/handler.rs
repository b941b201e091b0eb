//! Method handlers and middleware as first-class values.
//!
//! A handler is a capability with a single invocation taking
//! `(params, context)`.  Middleware receives `(request, context, next)`;
//! calling [`Next::run`] advances the chain, returning without calling it
//! short-circuits.

use crate::connection::ConnectionManager;
use futures_util::future::BoxFuture;
use relay_protocol::{Meta, Request, RpcError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Handler outcome
// ---------------------------------------------------------------------------

/// A handler failure.
///
/// `Rpc` carries a typed error that is propagated to the caller verbatim.
/// `Other` is any untyped failure; dispatch shapes it into an internal
/// error (with detail collapsed in production mode).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    pub fn other(err: impl std::fmt::Display) -> Self {
        HandlerError::Other(err.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// A registered method implementation.
pub type MethodHandler =
    Arc<dyn Fn(Option<Value>, RequestContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// An interceptor in the middleware chain.
pub type Middleware = Arc<
    dyn Fn(Arc<Request>, RequestContext, Next) -> BoxFuture<'static, HandlerResult> + Send + Sync,
>;

/// Wrap an async closure as a [`MethodHandler`].
pub fn handler_fn<F, Fut>(f: F) -> MethodHandler
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |params, ctx| Box::pin(f(params, ctx)))
}

/// Wrap an async closure as a [`Middleware`].
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Arc<Request>, RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |request, ctx, next| Box::pin(f(request, ctx, next)))
}

// ---------------------------------------------------------------------------
// Next: middleware chain position
// ---------------------------------------------------------------------------

/// The remainder of the middleware chain, with the handler implicit at
/// position `len(middleware)`.
///
/// Constructed per dispatch; each call to [`Next::run`] advances the index.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Middleware]>,
    handler: MethodHandler,
    index: usize,
}

impl Next {
    pub fn new(chain: Arc<[Middleware]>, handler: MethodHandler) -> Self {
        Next {
            chain,
            handler,
            index: 0,
        }
    }

    /// Run the rest of the chain, ending with the handler.
    pub fn run(self, request: Arc<Request>, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            if let Some(mw) = self.chain.get(self.index) {
                let mw = mw.clone();
                let next = Next {
                    chain: self.chain.clone(),
                    handler: self.handler.clone(),
                    index: self.index + 1,
                };
                mw(request, ctx, next).await
            } else {
                (self.handler)(request.params.clone(), ctx).await
            }
        })
    }
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Mutable per-dispatch execution context shared by middleware and handler.
///
/// Cheap to clone; all clones observe the same state.  Interceptors must
/// not retain it after the chain completes.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    connection_id: Option<String>,
    connections: Option<Arc<ConnectionManager>>,
    meta: Mutex<Meta>,
    data: Mutex<HashMap<String, Value>>,
}

impl RequestContext {
    /// A context with no connection attached (request/response transport).
    pub fn detached() -> Self {
        RequestContext {
            inner: Arc::new(ContextInner {
                connection_id: None,
                connections: None,
                meta: Mutex::new(Meta::default()),
                data: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A context bound to a live connection.
    pub fn for_connection(connection_id: String, connections: Arc<ConnectionManager>) -> Self {
        RequestContext {
            inner: Arc::new(ContextInner {
                connection_id: Some(connection_id),
                connections: Some(connections),
                meta: Mutex::new(Meta::default()),
                data: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.inner.connection_id.as_deref()
    }

    pub fn connections(&self) -> Option<&Arc<ConnectionManager>> {
        self.inner.connections.as_ref()
    }

    /// Snapshot of the context meta.
    pub fn meta(&self) -> Meta {
        self.inner
            .meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the context meta in place.
    pub fn update_meta(&self, f: impl FnOnce(&mut Meta)) {
        let mut meta = self
            .inner
            .meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut meta);
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }
}
