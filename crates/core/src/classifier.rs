//! Intent classification and conversation-context traits.
//!
//! The strategy selector consumes an [`Intent`] with a confidence and a
//! read-only [`ConversationContext`] snapshot. Both are produced behind
//! traits so a more capable classifier can replace the lexical one without
//! touching the selector or the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// What the user is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Thanks,
    Farewell,
    StepsNotSyncing,
    BatteryOptimization,
    PermissionDenied,
    WrongStepCount,
    General,
    Unknown,
}

impl Intent {
    /// Social intents answered from templates.
    pub fn is_simple(&self) -> bool {
        matches!(self, Intent::Greeting | Intent::Thanks | Intent::Farewell)
    }

    /// Troubleshooting intents with a known template body.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Intent::StepsNotSyncing
                | Intent::BatteryOptimization
                | Intent::PermissionDenied
                | Intent::WrongStepCount
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Thanks => "thanks",
            Intent::Farewell => "farewell",
            Intent::StepsNotSyncing => "steps_not_syncing",
            Intent::BatteryOptimization => "battery_optimization",
            Intent::PermissionDenied => "permission_denied",
            Intent::WrongStepCount => "wrong_step_count",
            Intent::General => "general",
            Intent::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let intent = match normalized.as_str() {
            "greeting" => Intent::Greeting,
            "thanks" => Intent::Thanks,
            "farewell" => Intent::Farewell,
            "steps_not_syncing" | "stepsnotsyncing" => Intent::StepsNotSyncing,
            "battery_optimization" | "batteryoptimization" => Intent::BatteryOptimization,
            "permission_denied" | "permissiondenied" => Intent::PermissionDenied,
            "wrong_step_count" | "wrongstepcount" => Intent::WrongStepCount,
            "general" => Intent::General,
            "unknown" => Intent::Unknown,
            other => return Err(format!("unknown intent: {other}")),
        };
        Ok(intent)
    }
}

/// Output of an [`IntentClassifier`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// In `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Coarse emotional tone of recent user turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
    Frustrated,
}

impl Sentiment {
    pub fn is_frustrated(&self) -> bool {
        matches!(self, Sentiment::Frustrated)
    }
}

/// Entities most recently referenced by the user.
///
/// History is sanitized, so apps and devices are only known by their
/// placeholder: the tracker records that one was mentioned, never which.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub app: bool,
    pub device: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

/// Read-only snapshot of session-derived state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub sentiment: Sentiment,
    /// Raw frustration score behind `sentiment`, for audit output.
    pub frustration_score: f32,
    /// Number of user turns in the retained history.
    pub turn_count: usize,
    pub entities: Entities,
}

/// The intent/sentiment classifier collaborator.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Classify sanitized `text` given the prior sanitized history.
    async fn classify(&self, text: &str, history: &[Message]) -> Classification;
}

/// Derives a [`ConversationContext`] from sanitized history.
pub trait ContextAnalyzer: Send + Sync {
    fn analyze(&self, history: &[Message]) -> ConversationContext;
}

/// Estimates the token cost of a text. Used to stamp messages on append.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_groups() {
        assert!(Intent::Greeting.is_simple());
        assert!(!Intent::Greeting.is_diagnostic());
        assert!(Intent::WrongStepCount.is_diagnostic());
        assert!(!Intent::General.is_simple());
        assert!(!Intent::General.is_diagnostic());
    }

    #[test]
    fn intent_parses_camel_and_snake() {
        assert_eq!("steps_not_syncing".parse::<Intent>().unwrap(), Intent::StepsNotSyncing);
        assert_eq!("stepsNotSyncing".parse::<Intent>().unwrap(), Intent::StepsNotSyncing);
        assert_eq!("battery-optimization".parse::<Intent>().unwrap(), Intent::BatteryOptimization);
        assert!("weather".parse::<Intent>().is_err());
    }

    #[test]
    fn intent_serializes_snake_case() {
        let json = serde_json::to_string(&Intent::PermissionDenied).unwrap();
        assert_eq!(json, "\"permission_denied\"");
    }

    #[test]
    fn default_context_is_neutral() {
        let ctx = ConversationContext::default();
        assert_eq!(ctx.sentiment, Sentiment::Neutral);
        assert!(!ctx.sentiment.is_frustrated());
        assert_eq!(ctx.turn_count, 0);
    }
}
