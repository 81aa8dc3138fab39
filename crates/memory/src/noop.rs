//! No-op store: disables persistence entirely.

use async_trait::async_trait;
use stridechat_core::error::PersistenceError;
use stridechat_core::{Message, MessageStore, SessionId};

/// A store that keeps nothing. History lives only as long as the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl MessageStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn load_messages(&self, _session_id: &SessionId) -> Result<Vec<Message>, PersistenceError> {
        Ok(Vec::new())
    }

    async fn save_message(&self, _session_id: &SessionId, _message: &Message) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn delete_session(&self, _session_id: &SessionId) -> Result<bool, PersistenceError> {
        Ok(false)
    }
}
