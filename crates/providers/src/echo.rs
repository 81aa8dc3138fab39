//! Dry-run endpoint that answers locally.
//!
//! Used by `stridechat chat` so the whole pipeline can be exercised without
//! network access. The reply is derived from the sanitized prompt only.

use async_trait::async_trait;
use std::time::Duration;
use stridechat_core::error::RemoteCallError;
use stridechat_core::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Default)]
pub struct EchoClient {
    latency: Duration,
}

impl EchoClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a slow endpoint.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl LlmClient for EchoClient {
    fn name(&self) -> &str {
        "echo"
    }

    async fn call(&self, request: LlmRequest) -> Result<LlmResponse, RemoteCallError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let content = format!(
            "(dry run, {} prior turns) You said: {}",
            request.history.len(),
            request.prompt.trim()
        );
        let token_count = content.split_whitespace().count() as u32;
        Ok(LlmResponse {
            content,
            token_count,
            latency: self.latency,
        })
    }
}
