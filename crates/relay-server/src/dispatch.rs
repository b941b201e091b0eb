//! Dispatch engine: one request through middleware + handler, with error
//! shaping, duration capture, and batch semantics.

use crate::handler::{HandlerError, Next, RequestContext};
use crate::registry::MethodRegistry;
use futures_util::future::join_all;
use relay_protocol::{BatchRequest, BatchResponse, Request, Response, RpcError};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Executes requests against a [`MethodRegistry`].
///
/// Handler and middleware failures never escape as anything but an error
/// [`Response`]; the engine is transport-neutral and is shared by the
/// bidirectional and request/response paths.
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    max_batch_size: usize,
    production_mode: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<MethodRegistry>, max_batch_size: usize, production_mode: bool) -> Self {
        Dispatcher {
            registry,
            max_batch_size,
            production_mode,
        }
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Dispatch a single request and shape the outcome as a response.
    pub async fn dispatch(&self, request: Request, ctx: RequestContext) -> Response {
        let started = Instant::now();
        debug!(id = %request.id, method = %request.method, "dispatching request");

        let Some(entry) = self.registry.resolve(&request.method).await else {
            return Response::failure(
                Some(request.id),
                RpcError::method_not_found(&request.method),
            );
        };

        if let Some(meta) = &request.meta {
            let meta = meta.clone();
            ctx.update_meta(|m| *m = meta);
        }

        let chain = self.registry.middleware_snapshot().await;
        let request = Arc::new(request);
        let outcome = Next::new(chain, entry.handler.clone())
            .run(request.clone(), ctx.clone())
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(result) => {
                let mut meta = ctx.meta();
                meta.duration = Some(elapsed_ms);
                Response {
                    id: Some(request.id.clone()),
                    result: Some(result),
                    error: None,
                    meta: Some(meta),
                }
            }
            Err(err) => {
                warn!(id = %request.id, method = %request.method, error = %err, "handler failed");
                Response::failure(Some(request.id.clone()), self.shape_error(err))
            }
        }
    }

    /// Shape a handler failure into an RPC error.
    ///
    /// Typed errors propagate code, message and data verbatim.  Untyped
    /// failures become internal errors; in production mode the detail is
    /// collapsed to a generic message and data is dropped.
    fn shape_error(&self, err: HandlerError) -> RpcError {
        match err {
            HandlerError::Rpc(rpc) => rpc,
            HandlerError::Other(detail) => {
                if self.production_mode {
                    RpcError::internal("Internal error")
                } else {
                    RpcError::internal(detail)
                }
            }
        }
    }

    /// Dispatch a batch.
    ///
    /// `Err` means the batch as a whole was rejected (too many members);
    /// callers wrap it in an error response carrying the batch id.
    pub async fn dispatch_batch(
        &self,
        batch: BatchRequest,
        ctx: RequestContext,
    ) -> Result<BatchResponse, RpcError> {
        if batch.requests.len() > self.max_batch_size {
            return Err(RpcError::invalid_request(&format!(
                "batch exceeds {} requests",
                self.max_batch_size
            )));
        }
        let started = Instant::now();
        let responses = if batch.aborts_on_error() {
            self.run_sequential(batch.requests, &ctx).await
        } else {
            self.run_parallel(batch.requests, &ctx).await
        };
        let success = responses.iter().all(|r| r.error.is_none());
        let duration = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(BatchResponse {
            id: batch.id,
            responses,
            success,
            duration: Some(duration),
        })
    }

    /// All members concurrently; output preserves input order.
    async fn run_parallel(&self, requests: Vec<Request>, ctx: &RequestContext) -> Vec<Response> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.dispatch(request, fresh_member_ctx(ctx))),
        )
        .await
    }

    /// Members in order, stopping at the first error.  The returned vec may
    /// be shorter than the request array.
    async fn run_sequential(&self, requests: Vec<Request>, ctx: &RequestContext) -> Vec<Response> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let response = self.dispatch(request, fresh_member_ctx(ctx)).await;
            let failed = response.error.is_some();
            responses.push(response);
            if failed {
                break;
            }
        }
        responses
    }
}

/// Each batch member runs with its own meta/data scope but keeps the
/// connection binding of the enclosing context.
fn fresh_member_ctx(ctx: &RequestContext) -> RequestContext {
    match (ctx.connection_id(), ctx.connections()) {
        (Some(id), Some(manager)) => {
            RequestContext::for_connection(id.to_owned(), manager.clone())
        }
        _ => RequestContext::detached(),
    }
}
