//! Request context: token accounting and prompt assembly.
//!
//! | Piece | Source | Trim strategy |
//! |-------|--------|---------------|
//! | System prompt | Config | Never trimmed |
//! | Diagnostics | Caller | Never trimmed, rendered verbatim |
//! | Conversation history | Session memory | Oldest turns dropped |

pub mod prompt;
pub mod token;

pub use prompt::{PromptAssembler, PromptInput};
pub use token::{CacheStats, ModelFamily, TokenBudget, TokenCounter, estimate_tokens};
