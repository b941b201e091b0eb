//! Client-side batch/pipeline builder.
//!
//! Accumulates planned calls and issues them as one batch request.
//! Back-references to earlier members are serialized as `{"$ref": index}`
//! marker params; the server may inline or reject the marker.  `execute`
//! consumes the builder, so reuse is impossible by construction.

use crate::error::ClientError;
use crate::RpcClient;
use relay_protocol::{BatchRequest, BatchResponse, Request};
use serde_json::{json, Value};

struct PlannedCall {
    method: String,
    params: Option<Value>,
}

#[derive(Default)]
pub struct BatchBuilder {
    calls: Vec<PlannedCall>,
    abort_on_error: bool,
}

impl BatchBuilder {
    pub fn new() -> Self {
        BatchBuilder::default()
    }

    /// Plan a call; returns its member index for back-references.
    pub fn add(&mut self, method: impl Into<String>, params: Option<Value>) -> usize {
        self.calls.push(PlannedCall {
            method: method.into(),
            params,
        });
        self.calls.len() - 1
    }

    /// Plan a call whose params are the result of an earlier member.
    pub fn add_ref(&mut self, method: impl Into<String>, ref_index: usize) -> usize {
        self.add(method.into(), Some(json!({ "$ref": ref_index })))
    }

    /// Stop at the first member error instead of running in parallel.
    pub fn abort_on_error(mut self, flag: bool) -> Self {
        self.abort_on_error = flag;
        self
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Materialize the wire request, allocating a batch id and member ids.
    fn build(self, next_id: &mut dyn FnMut() -> String) -> Result<BatchRequest, ClientError> {
        if self.calls.is_empty() {
            return Err(ClientError::Protocol(
                "a batch requires at least one call".to_owned(),
            ));
        }
        let id = next_id();
        let requests = self
            .calls
            .into_iter()
            .map(|call| {
                let mut request = Request::new(next_id(), call.method);
                request.params = call.params;
                request
            })
            .collect();
        Ok(BatchRequest {
            id,
            requests,
            abort_on_error: self.abort_on_error.then_some(true),
        })
    }

    /// Send the batch and return the full batch envelope.
    pub async fn execute(self, client: &RpcClient) -> Result<BatchResponse, ClientError> {
        let mut allocate = client.id_allocator();
        let batch = self.build(&mut allocate)?;
        client.call_batch(batch).await
    }

    /// Send the batch and return the ordered member results, failing on
    /// the first member error.
    pub async fn pipeline(self, client: &RpcClient) -> Result<Vec<Value>, ClientError> {
        let response = self.execute(client).await?;
        let mut results = Vec::with_capacity(response.responses.len());
        for member in response.responses {
            if let Some(error) = member.error {
                return Err(ClientError::Rpc(error));
            }
            results.push(member.result.unwrap_or(Value::Null));
        }
        Ok(results)
    }
}
