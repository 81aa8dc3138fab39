//! `stridechat explain`: Show the strategy a message would get.

use std::path::Path;
use stridechat_agent::StrategySelector;
use stridechat_config::StoreBackend;
use stridechat_core::SessionId;

use super::{CmdResult, dry_run_orchestrator, load_config};

pub async fn run(
    config_path: Option<&Path>,
    text: &str,
    turns: Option<usize>,
    session: Option<&str>,
) -> CmdResult {
    let mut config = load_config(config_path)?;
    let session_id = match session {
        Some(id) => SessionId::from(id),
        None => {
            // Nothing to read back, so keep the scratch session off disk.
            config.memory.backend = StoreBackend::Memory;
            SessionId::new()
        }
    };

    let orchestrator = dry_run_orchestrator(&config).await?;
    let mut preview = orchestrator.preview(&session_id, text).await?;
    if let Some(turns) = turns {
        preview.context.turn_count = turns;
        preview.explanation = StrategySelector::new(&config.strategy).explain(
            preview.classification.intent,
            &preview.context,
            preview.classification.confidence,
        );
    }

    let decision = &preview.explanation.decision;
    println!("  Sanitized:  {}", preview.sanitized_text);
    println!(
        "  Intent:     {} (confidence {:.2})",
        preview.classification.intent, preview.classification.confidence
    );
    println!(
        "  Sentiment:  {:?} (score {:.1}), {} user turns",
        preview.context.sentiment, preview.context.frustration_score, preview.context.turn_count
    );
    println!("  Strategy:   {} (cost {:.2})", decision.strategy, decision.estimated_cost);
    println!();
    for rule in &preview.explanation.evaluated {
        let mark = if rule.matched { "=>" } else { "  " };
        println!("  {mark} {:<18} {}", rule.rule, rule.detail);
    }
    Ok(())
}
