//! LlmClient trait: the abstraction over the remote model endpoint.
//!
//! The transport (HTTP, auth, retries) is owned by the implementation. The
//! pipeline only relies on `call(prompt, system_prompt, timeout)` returning
//! content, token usage and latency, or failing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::RemoteCallError;
use crate::message::Message;

/// Diagnostic results injected verbatim into prompts. The pipeline never
/// interprets the values.
pub type Diagnostics = BTreeMap<String, serde_json::Value>;

/// A single request to the remote model.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The model to use
    pub model: String,

    /// The current (sanitized) user prompt
    pub prompt: String,

    /// System instructions, including any rendered diagnostics
    pub system_prompt: String,

    /// Prior sanitized turns, already trimmed to the token budget
    pub history: Vec<Message>,

    /// Caller-supplied deadline for this call
    pub timeout: Duration,
}

/// A complete response from the remote model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Generated text
    pub content: String,

    /// Tokens consumed, as reported by the endpoint
    pub token_count: u32,

    /// Round-trip latency
    pub latency: Duration,
}

/// The remote LLM collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable endpoint name (e.g., "openai", "echo").
    fn name(&self) -> &str;

    /// Send a request and wait for the complete response.
    async fn call(&self, request: LlmRequest) -> std::result::Result<LlmResponse, RemoteCallError>;

    /// Health check: can we reach the endpoint?
    async fn health_check(&self) -> std::result::Result<bool, RemoteCallError> {
        Ok(true)
    }
}
