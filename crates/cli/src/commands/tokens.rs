//! `stridechat tokens`: Estimate the token cost of a text.

use std::path::Path;
use stridechat_agent::{ModelFamily, TokenCounter};

use super::{CmdResult, load_config};

pub fn run(config_path: Option<&Path>, text: &str, model: Option<&str>) -> CmdResult {
    let config = load_config(config_path)?;
    let model = model.unwrap_or(&config.model);
    let counter = TokenCounter::new(&config.tokens, model);
    let budget = counter.budget();

    println!("  Model:      {model} ({:?})", ModelFamily::from_model(model));
    println!("  Tokens:     {}", counter.count_tokens(text));
    println!(
        "  Budget:     {} of {} (safety margin {})",
        budget.available(),
        budget.context_limit,
        budget.safety_margin
    );
    Ok(())
}
