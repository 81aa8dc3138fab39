//! `stridechat history`: Print a stored session.

use std::path::Path;
use stridechat_core::SessionId;

use super::{CmdResult, dry_run_orchestrator, load_config};

pub async fn run(config_path: Option<&Path>, session: &str) -> CmdResult {
    let config = load_config(config_path)?;
    let orchestrator = dry_run_orchestrator(&config).await?;
    let messages = orchestrator.history(&SessionId::from(session)).await;

    if messages.is_empty() {
        println!("  No messages for session {session}");
        return Ok(());
    }
    for message in &messages {
        println!(
            "  [{}] {:<9} {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.role.as_str(),
            message.text
        );
    }
    println!();
    println!("  {} messages (max {})", messages.len(), config.memory.max_messages);
    Ok(())
}
