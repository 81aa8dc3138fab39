//! Subcommand implementations.

pub mod chat;
pub mod config_cmd;
pub mod explain;
pub mod history;
pub mod sanitize;
pub mod status;
pub mod tokens;

use std::path::Path;
use std::sync::Arc;
use stridechat_agent::Orchestrator;
use stridechat_config::AppConfig;
use stridechat_providers::EchoClient;

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load the config at `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> CmdResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

/// The full pipeline against the configured store and the dry-run endpoint.
pub async fn dry_run_orchestrator(config: &AppConfig) -> CmdResult<Orchestrator> {
    let store = stridechat_memory::open_store(config)
        .await
        .map_err(|e| format!("Failed to open message store: {e}"))?;
    tracing::debug!(backend = ?config.memory.backend, model = %config.model, "Building dry-run pipeline");
    Ok(Orchestrator::new(config, store, Arc::new(EchoClient::new()))?)
}
