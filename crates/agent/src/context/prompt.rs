//! Builds the remote request from the system prompt, diagnostics and a
//! budget-trimmed history window.

use std::sync::Arc;
use std::time::Duration;
use stridechat_core::{Diagnostics, LlmRequest, Message};

use super::token::{TokenBudget, TokenCounter};

const DIAGNOSTICS_HEADER: &str = "[Diagnostics]";
const HYBRID_INSTRUCTION: &str = "[Response Format]\nA standard troubleshooting guide is already shown to the user. Add one or two short sentences specific to their situation. Do not repeat the guide.";

/// Inputs for one remote request.
pub struct PromptInput<'a> {
    /// Current sanitized user text.
    pub prompt: &'a str,
    /// Id of the stored user message, excluded from the history window.
    pub prompt_id: &'a str,
    /// Session history snapshot, oldest first.
    pub history: &'a [Message],
    pub diagnostics: Option<&'a Diagnostics>,
    /// Ask for a short fragment to append to a template.
    pub fragment_only: bool,
}

#[derive(Debug)]
pub struct PromptAssembler {
    model: String,
    system_prompt: String,
    timeout: Duration,
    budget: TokenBudget,
    tokens: Arc<TokenCounter>,
}

impl PromptAssembler {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        timeout: Duration,
        tokens: Arc<TokenCounter>,
    ) -> Self {
        let budget = tokens.budget();
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            timeout,
            budget,
            tokens,
        }
    }

    /// Render the system message: base prompt, then each optional section.
    pub fn render_system(&self, diagnostics: Option<&Diagnostics>, fragment_only: bool) -> String {
        let mut sections = vec![self.system_prompt.clone()];
        if let Some(diag) = diagnostics.filter(|d| !d.is_empty()) {
            let rendered = serde_json::to_string_pretty(diag).unwrap_or_else(|_| "{}".into());
            sections.push(format!("{DIAGNOSTICS_HEADER}\n{rendered}"));
        }
        if fragment_only {
            sections.push(HYBRID_INSTRUCTION.to_string());
        }
        sections.join("\n\n")
    }

    pub fn build(&self, input: PromptInput<'_>) -> LlmRequest {
        let system_prompt = self.render_system(input.diagnostics, input.fragment_only);
        let system_tokens = self.tokens.count_tokens(&system_prompt);
        let window = self.tokens.trim_to_fit(input.history, system_tokens, &self.budget);
        let history = window
            .into_iter()
            .filter(|m| m.id != input.prompt_id)
            .collect();

        LlmRequest {
            model: self.model.clone(),
            prompt: input.prompt.to_string(),
            system_prompt,
            history,
            timeout: self.timeout,
        }
    }
}
