//! The StrideChat conversation pipeline.
//!
//! Each user message goes through the same steps:
//!
//! 1. **Sanitize** the raw text (PHI becomes `[NUMBER]`, `[APP]`, ...)
//! 2. **Remember** it in the session's bounded history
//! 3. **Classify** intent and read sentiment from recent turns
//! 4. **Select** a strategy: template, LLM or hybrid
//! 5. **Call** the remote model through the circuit breaker when needed,
//!    with history trimmed to the token budget
//! 6. **Fall back** to templates whenever the remote path fails
//!
//! Only a strict-mode sanitization failure stops a reply.

pub mod analysis;
pub mod context;
pub mod orchestrator;
pub mod strategy;
pub mod templates;

pub use analysis::LexicalAnalyzer;
pub use context::{
    CacheStats, ModelFamily, PromptAssembler, PromptInput, TokenBudget, TokenCounter,
    estimate_tokens,
};
pub use orchestrator::{Orchestrator, OrchestratorMetrics, Preview, Reply};
pub use strategy::{
    RuleEvaluation, Strategy, StrategyDecision, StrategyExplanation, StrategySelector,
};
