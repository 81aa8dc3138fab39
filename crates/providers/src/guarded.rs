//! A remote endpoint paired with the breaker that protects it.

use std::sync::Arc;
use stridechat_core::error::{Error, RemoteCallError};
use stridechat_core::{LlmClient, LlmRequest, LlmResponse};
use tracing::debug;

use crate::circuit_breaker::{BreakerError, CircuitBreaker};

/// Routes every call to one `LlmClient` through its `CircuitBreaker`.
///
/// Several guarded clients may share a breaker when they reach the same
/// endpoint; the breaker is the unit of failure accounting.
#[derive(Clone)]
pub struct GuardedClient {
    client: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for GuardedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedClient")
            .field("client", &self.client.name())
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl GuardedClient {
    pub fn new(client: Arc<dyn LlmClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, breaker }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Call the endpoint with the request's own timeout.
    ///
    /// Returns `Error::CircuitOpen` when rejected without a call and
    /// `Error::Remote` for failures and timeouts.
    pub async fn call(&self, request: LlmRequest) -> stridechat_core::Result<LlmResponse> {
        let timeout = request.timeout;
        debug!(
            client = %self.client.name(),
            endpoint = %self.breaker.endpoint(),
            history = request.history.len(),
            "Guarded remote call"
        );
        self.breaker
            .execute(timeout, || self.client.call(request))
            .await
            .map_err(into_error)
    }
}

fn into_error(err: BreakerError<RemoteCallError>) -> Error {
    match err {
        BreakerError::Open(open) => Error::CircuitOpen(open),
        BreakerError::Timeout(after) => Error::Remote(RemoteCallError::Timeout {
            timeout_ms: after.as_millis() as u64,
        }),
        BreakerError::Operation(e) => Error::Remote(e),
    }
}
