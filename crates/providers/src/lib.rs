//! Remote LLM invocation for StrideChat.
//!
//! Every remote endpoint is reached through a [`GuardedClient`], which pairs
//! an `LlmClient` with the [`CircuitBreaker`] protecting that endpoint.
//! Transports themselves live outside this workspace; [`EchoClient`] is a
//! dry-run endpoint for the CLI.

pub mod circuit_breaker;
pub mod echo;
pub mod guarded;

pub use circuit_breaker::{BreakerError, BreakerMetrics, CircuitBreaker, CircuitPhase};
pub use echo::EchoClient;
pub use guarded::GuardedClient;
