//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use stridechat_core::error::PersistenceError;
use stridechat_core::{Message, MessageStore, SessionId};
use tokio::sync::RwLock;

/// Keeps every session's messages in a map. Survives manager restarts as
/// long as the store itself is shared.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<SessionId, Vec<Message>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored for a session.
    pub async fn message_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, Vec::len)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, PersistenceError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_message(&self, session_id: &SessionId, message: &Message) -> Result<(), PersistenceError> {
        self.sessions
            .write()
            .await
            .entry(session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, PersistenceError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_in_order() {
        let store = InMemoryStore::new();
        let sid = SessionId::from("s1");
        for text in ["one", "two", "three"] {
            store.save_message(&sid, &Message::user(sid.clone(), text)).await.unwrap();
        }
        let texts: Vec<String> = store
            .load_messages(&sid)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert!(store.load_messages(&SessionId::from("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_session_reports_presence() {
        let store = InMemoryStore::new();
        let sid = SessionId::from("s1");
        store.save_message(&sid, &Message::user(sid.clone(), "hi")).await.unwrap();
        assert!(store.delete_session(&sid).await.unwrap());
        assert!(!store.delete_session(&sid).await.unwrap());
        assert_eq!(store.message_count(&sid).await, 0);
    }
}
