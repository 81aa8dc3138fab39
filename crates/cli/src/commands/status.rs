//! `stridechat status`: Show configuration and pipeline status.

use std::path::Path;
use stridechat_config::AppConfig;

use super::{CmdResult, dry_run_orchestrator, load_config};

pub async fn run(config_path: Option<&Path>) -> CmdResult {
    let config = load_config(config_path)?;
    let orchestrator = dry_run_orchestrator(&config).await?;
    let metrics = orchestrator.metrics().await;

    println!("StrideChat Status");
    println!("=================");
    println!("  Config file:  {}", config_path.map(Path::to_path_buf).unwrap_or_else(AppConfig::config_path).display());
    println!("  Data dir:     {}", config.data_dir().display());
    println!("  Model:        {}", config.model);
    println!("  Endpoint:     {} ({})", config.endpoint, metrics.breaker.phase);
    println!("  Sanitizer:    {:?}", config.sanitizer.policy);
    println!("  Store:        {:?} ({} persistence)", config.memory.backend, format!("{:?}", config.memory.persistence).to_lowercase());
    println!("  Max messages: {}", config.memory.max_messages);
    println!(
        "  Breaker:      {} failures / {}s window, {}s cooldown",
        config.breaker.failure_threshold,
        config.breaker.failure_window().as_secs(),
        config.breaker.cooldown().as_secs()
    );
    println!(
        "  Tokens:       {} context, {} safety margin",
        config.tokens.context_limit, config.tokens.safety_margin
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
