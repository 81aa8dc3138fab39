//! SQLite store.
//!
//! One `messages` table; an autoincrement `seq` column records save order so
//! a session loads back exactly as it was appended.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use stridechat_core::error::PersistenceError;
use stridechat_core::{Message, MessageStore, Role, SessionId};
use tracing::{debug, info, warn};

/// SQLite-backed message store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PersistenceError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite message store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PersistenceError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                session_id   TEXT NOT NULL,
                role         TEXT NOT NULL,
                text         TEXT NOT NULL,
                timestamp    TEXT NOT NULL,
                token_count  INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, seq)")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::MigrationFailed(format!("session index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, PersistenceError> {
        let column = |name: &str, e: sqlx::Error| PersistenceError::Corrupted(format!("{name} column: {e}"));

        let id: String = row.try_get("id").map_err(|e| column("id", e))?;
        let session_id: String = row.try_get("session_id").map_err(|e| column("session_id", e))?;
        let role: String = row.try_get("role").map_err(|e| column("role", e))?;
        let text: String = row.try_get("text").map_err(|e| column("text", e))?;
        let timestamp: String = row.try_get("timestamp").map_err(|e| column("timestamp", e))?;
        let token_count: i64 = row.try_get("token_count").map_err(|e| column("token_count", e))?;

        let role = Role::from_str(&role).map_err(PersistenceError::Corrupted)?;
        let timestamp = chrono::DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| PersistenceError::Corrupted(format!("timestamp {timestamp:?}: {e}")))?;

        Ok(Message {
            id,
            session_id: SessionId(session_id),
            role,
            text,
            timestamp,
            token_count: usize::try_from(token_count).unwrap_or(0),
        })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, text, timestamp, token_count FROM messages WHERE session_id = ?1 ORDER BY seq",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::LoadFailed {
            session_id: session_id.to_string(),
            reason: e.to_string(),
        })?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_message(row) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(session_id = %session_id, error = %e, "Skipping corrupted message row"),
            }
        }
        Ok(messages)
    }

    async fn save_message(&self, session_id: &SessionId, message: &Message) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, text, timestamp, token_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&message.id)
        .bind(session_id.as_str())
        .bind(message.role.as_str())
        .bind(&message.text)
        .bind(message.timestamp.to_rfc3339())
        .bind(message.token_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::Storage(format!("INSERT failed: {e}")))?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM messages WHERE session_id = ?1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}
