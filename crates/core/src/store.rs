//! MessageStore trait: durable persistence for session history.
//!
//! Stores receive and return already-sanitized messages only. Loading must
//! preserve append order so that a restarted process reconstructs the exact
//! history it had before.

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::message::{Message, SessionId};

/// The persistence collaborator.
///
/// Implementations: JSONL files, SQLite, in-memory (for testing), none (no-op).
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The backend name (e.g., "file", "sqlite", "none").
    fn name(&self) -> &str;

    /// Load all messages of a session in append order.
    async fn load_messages(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<Vec<Message>, PersistenceError>;

    /// Append one message to a session.
    async fn save_message(
        &self,
        session_id: &SessionId,
        message: &Message,
    ) -> std::result::Result<(), PersistenceError>;

    /// Delete every message of a session. Returns whether anything was removed.
    async fn delete_session(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<bool, PersistenceError>;
}
