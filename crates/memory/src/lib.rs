//! Conversation memory for StrideChat.
//!
//! [`MemoryManager`] owns per-session history; a [`MessageStore`] backend
//! makes it durable. Backends:
//! - `file` (default): JSONL file per session
//! - `sqlite`: single database, behind the `sqlite` feature
//! - `memory`: process-local, for tests
//! - `none`: no persistence

pub mod file_backend;
pub mod in_memory;
pub mod manager;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use manager::{LockStats, MemoryManager, MemoryStats, SessionUsage};
pub use noop::NoopStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;
use stridechat_config::{AppConfig, StoreBackend};
use stridechat_core::error::PersistenceError;
use stridechat_core::MessageStore;

/// Open the store selected by `config.memory.backend`.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn MessageStore>, PersistenceError> {
    let data_dir = config.data_dir();
    let store: Arc<dyn MessageStore> = match config.memory.backend {
        StoreBackend::File => Arc::new(FileStore::under(&data_dir)),
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::None => Arc::new(NoopStore),
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => {
            std::fs::create_dir_all(&data_dir)
                .map_err(|e| PersistenceError::Storage(format!("Failed to create data directory: {e}")))?;
            let url = format!("sqlite://{}", data_dir.join("stridechat.db").display());
            Arc::new(SqliteStore::new(&url).await?)
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => {
            return Err(PersistenceError::Storage(
                "SQLite backend requested but the `sqlite` feature is disabled".into(),
            ));
        }
    };
    tracing::debug!(backend = store.name(), dir = %data_dir.display(), "Message store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stridechat_config::MemoryConfig;

    fn config_with(backend: StoreBackend, dir: &std::path::Path) -> AppConfig {
        AppConfig {
            memory: MemoryConfig {
                backend,
                data_dir: Some(dir.display().to_string()),
                ..MemoryConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn opens_configured_backend() {
        let tmp = tempfile::tempdir().unwrap();
        for (backend, name) in [
            (StoreBackend::File, "file"),
            (StoreBackend::Memory, "memory"),
            (StoreBackend::None, "none"),
        ] {
            let store = open_store(&config_with(backend, tmp.path())).await.unwrap();
            assert_eq!(store.name(), name);
        }
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn opens_sqlite_database_in_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&config_with(StoreBackend::Sqlite, tmp.path())).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(tmp.path().join("stridechat.db").exists());
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn sqlite_backend_requires_feature() {
        let tmp = tempfile::tempdir().unwrap();
        let err = open_store(&config_with(StoreBackend::Sqlite, tmp.path())).await.err().unwrap();
        assert!(err.to_string().contains("sqlite"));
    }
}
