//! File-based store: persistent JSON-lines storage, one file per session.
//!
//! Each line is a JSON-encoded `Message`, appended in save order, so a
//! session file reads back in exactly the order it was written.
//!
//! Storage location: `<data_dir>/sessions/<session>.jsonl`
//!
//! Human-inspectable and portable; no database required.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stridechat_core::error::PersistenceError;
use stridechat_core::{Message, MessageStore, SessionId};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A directory of JSONL session files.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    // Serializes appends so concurrent writers never interleave lines.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    /// Default location under a data directory.
    pub fn under(data_dir: &Path) -> Self {
        Self::new(data_dir.join("sessions"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a session's file. Characters outside `[A-Za-z0-9_-]` are
    /// hex-escaped so distinct ids never share a file.
    pub fn session_path(&self, session_id: &SessionId) -> PathBuf {
        let mut name = String::with_capacity(session_id.as_str().len() + 6);
        for byte in session_id.as_str().bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name.push_str(".jsonl");
        self.dir.join(name)
    }
}

#[async_trait]
impl MessageStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, PersistenceError> {
        let path = self.session_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PersistenceError::LoadFailed {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let messages: Vec<Message> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Skipping corrupted message line");
                    None
                }
            })
            .collect();
        debug!(session_id = %session_id, count = messages.len(), "Loaded session file");
        Ok(messages)
    }

    async fn save_message(&self, session_id: &SessionId, message: &Message) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| PersistenceError::Storage(format!("Failed to serialize message: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to create session directory: {e}")))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(session_id))
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to open session file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to append message: {e}")))?;
        file.flush()
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to flush session file: {e}")))?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::Storage(format!("Failed to delete session file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use stridechat_core::Role;

    #[tokio::test]
    async fn append_and_reload_persists_order() {
        let tmp = tempfile::tempdir().unwrap();
        let sid = SessionId::from("user-42");

        let store = FileStore::new(tmp.path());
        for (i, role) in [Role::User, Role::Assistant, Role::User].into_iter().enumerate() {
            let msg = Message::new(sid.clone(), role, format!("turn {i}"), 2);
            store.save_message(&sid, &msg).await.unwrap();
        }

        // A fresh store over the same directory sees the same history.
        let reopened = FileStore::new(tmp.path());
        let loaded = reopened.load_messages(&sid).await.unwrap();
        let texts: Vec<&str> = loaded.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["turn 0", "turn 1", "turn 2"]);
        assert_eq!(loaded[1].role, Role::Assistant);
        assert_eq!(loaded[0].token_count, 2);
    }

    #[tokio::test]
    async fn missing_session_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path().join("not-yet-created"));
        assert!(store.load_messages(&SessionId::from("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn skips_corrupted_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        let sid = SessionId::from("s1");
        store.save_message(&sid, &Message::user(sid.clone(), "valid")).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.session_path(&sid))
            .unwrap();
        writeln!(file, "this is not json").unwrap();
        drop(file);
        store.save_message(&sid, &Message::user(sid.clone(), "also valid")).await.unwrap();

        let loaded = store.load_messages(&sid).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].text, "also valid");
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        let sid = SessionId::from("s1");
        store.save_message(&sid, &Message::user(sid.clone(), "bye")).await.unwrap();

        assert!(store.delete_session(&sid).await.unwrap());
        assert!(!store.session_path(&sid).exists());
        assert!(!store.delete_session(&sid).await.unwrap());
    }

    #[test]
    fn session_paths_are_escaped() {
        let store = FileStore::new("/data");
        assert_eq!(
            store.session_path(&SessionId::from("a/b c")),
            PathBuf::from("/data/a%2Fb%20c.jsonl")
        );
        assert_ne!(
            store.session_path(&SessionId::from("a.b")),
            store.session_path(&SessionId::from("a_b"))
        );
    }
}
