//! # StrideChat Core
//!
//! Domain types, collaborator traits, and error definitions for the StrideChat
//! conversation pipeline. This crate has **no runtime dependencies** beyond
//! serialization and time handling: it defines the model every other crate
//! implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (remote LLM, persistence, classifier) is a
//! trait here. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Testing with scripted mock collaborators
//! - A clean dependency graph (all crates depend inward on core)

pub mod classifier;
pub mod error;
pub mod llm;
pub mod message;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use classifier::{
    Classification, ContextAnalyzer, ConversationContext, Entities, Intent, IntentClassifier,
    Sentiment, TokenEstimator,
};
pub use error::{
    CircuitOpenError, Error, PersistenceError, RemoteCallError, Result, SanitizationError,
};
pub use llm::{Diagnostics, LlmClient, LlmRequest, LlmResponse};
pub use message::{Message, Role, Session, SessionId};
pub use store::MessageStore;
