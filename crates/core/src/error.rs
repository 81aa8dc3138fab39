//! Error types for the StrideChat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each failure category of the pipeline has its own error type; the
//! top-level [`Error`] wraps them for propagation across crates.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all StrideChat operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Privacy ---
    #[error("Sanitization error: {0}")]
    Sanitization(#[from] SanitizationError),

    // --- Remote invocation ---
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("Remote call error: {0}")]
    Remote(#[from] RemoteCallError),

    // --- Persistence ---
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the orchestrator may answer with a template instead.
    ///
    /// Only sanitization failures block a response outright.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Sanitization(_))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Residual PHI survived redaction under the strict policy.
///
/// Carries the input length only. The offending text is never stored in
/// the error, so it cannot leak through logs or `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizationError {
    #[error("residual PHI detected after redaction ({text_len} bytes of input); transmission blocked")]
    ResidualPhi { text_len: usize },
}

/// The circuit breaker rejected a call without invoking the remote operation.
#[derive(Debug, Clone, Error)]
#[error("Circuit '{endpoint}' is open; next attempt allowed at {next_attempt_at} (in {}ms)", .retry_after.as_millis())]
pub struct CircuitOpenError {
    /// The endpoint the breaker protects.
    pub endpoint: String,
    /// Wall-clock time at which a probe will be admitted.
    pub next_attempt_at: DateTime<Utc>,
    /// Remaining cooldown. Zero when rejected because a probe is in flight.
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Error)]
pub enum RemoteCallError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Endpoint not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Load failed for session {session_id}: {reason}")]
    LoadFailed { session_id: String, reason: String },

    #[error("Corrupted record: {0}")]
    Corrupted(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
