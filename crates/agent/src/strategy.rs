//! Response strategy selection.
//!
//! An ordered rule list evaluated top to bottom; the first rule that matches
//! decides. [`StrategySelector::explain`] walks the same list and records
//! every rule it evaluated, so audit output can never disagree with the
//! decision actually taken.

use serde::{Deserialize, Serialize};
use stridechat_config::StrategyConfig;
use stridechat_core::{ConversationContext, Intent};

/// How a reply is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Canned reply, no remote call
    Template,
    /// Fully generated by the remote model
    Llm,
    /// Template body plus a short generated fragment
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Template => "template",
            Strategy::Llm => "llm",
            Strategy::Hybrid => "hybrid",
        }
    }

    pub fn needs_remote(&self) -> bool {
        !matches!(self, Strategy::Template)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub strategy: Strategy,
    /// Why the winning rule fired.
    pub reasons: Vec<String>,
    pub estimated_cost: f64,
}

/// One rule as seen by [`StrategySelector::explain`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEvaluation {
    pub rule: &'static str,
    pub matched: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyExplanation {
    pub decision: StrategyDecision,
    /// Rules in evaluation order, ending with the one that matched.
    pub evaluated: Vec<RuleEvaluation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    SimpleIntent,
    Frustrated,
    LowConfidence,
    DiagnosticIntent,
    LongConversation,
    Default,
}

impl Rule {
    fn name(&self) -> &'static str {
        match self {
            Rule::SimpleIntent => "simple_intent",
            Rule::Frustrated => "frustrated",
            Rule::LowConfidence => "low_confidence",
            Rule::DiagnosticIntent => "diagnostic_intent",
            Rule::LongConversation => "long_conversation",
            Rule::Default => "default",
        }
    }
}

// `Rule::Default` always closes the list.
const STANDARD_ORDER: [Rule; 5] = [
    Rule::SimpleIntent,
    Rule::Frustrated,
    Rule::LowConfidence,
    Rule::DiagnosticIntent,
    Rule::LongConversation,
];

const FRUSTRATION_FIRST: [Rule; 5] = [
    Rule::Frustrated,
    Rule::SimpleIntent,
    Rule::LowConfidence,
    Rule::DiagnosticIntent,
    Rule::LongConversation,
];

/// Pure decision function over intent, context and classifier confidence.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    config: StrategyConfig,
}

impl StrategySelector {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn order(&self) -> &'static [Rule; 5] {
        if self.config.frustration_overrides_simple_intents {
            &FRUSTRATION_FIRST
        } else {
            &STANDARD_ORDER
        }
    }

    /// Returns the strategy and detail text when `rule` matches.
    fn evaluate(
        &self,
        rule: Rule,
        intent: Intent,
        context: &ConversationContext,
        confidence: f32,
    ) -> (Option<Strategy>, String) {
        match rule {
            Rule::SimpleIntent => (
                intent.is_simple().then_some(Strategy::Template),
                format!("intent {intent} is simple: {}", intent.is_simple()),
            ),
            Rule::Frustrated => (
                context.sentiment.is_frustrated().then_some(Strategy::Llm),
                format!(
                    "sentiment {:?} (score {:.1})",
                    context.sentiment, context.frustration_score
                ),
            ),
            Rule::LowConfidence => {
                let low = confidence < self.config.template_confidence_threshold;
                (
                    low.then_some(Strategy::Llm),
                    format!(
                        "confidence {confidence:.2} vs threshold {:.2}",
                        self.config.template_confidence_threshold
                    ),
                )
            }
            Rule::DiagnosticIntent => (
                intent.is_diagnostic().then_some(Strategy::Hybrid),
                format!("intent {intent} is diagnostic: {}", intent.is_diagnostic()),
            ),
            Rule::LongConversation => {
                let long = context.turn_count > self.config.multi_turn_threshold;
                (
                    long.then_some(Strategy::Llm),
                    format!(
                        "{} user turns vs threshold {}",
                        context.turn_count, self.config.multi_turn_threshold
                    ),
                )
            }
            Rule::Default => (Some(Strategy::Llm), "no earlier rule matched".into()),
        }
    }

    /// Choose a strategy. First matching rule wins.
    pub fn select(&self, intent: Intent, context: &ConversationContext, confidence: f32) -> StrategyDecision {
        self.explain(intent, context, confidence).decision
    }

    /// Same decision as [`select`](Self::select), plus every rule evaluated.
    pub fn explain(&self, intent: Intent, context: &ConversationContext, confidence: f32) -> StrategyExplanation {
        let mut evaluated = Vec::new();
        for &rule in self.order().iter().chain([Rule::Default].iter()) {
            let (outcome, detail) = self.evaluate(rule, intent, context, confidence);
            evaluated.push(RuleEvaluation {
                rule: rule.name(),
                matched: outcome.is_some(),
                detail: detail.clone(),
            });
            if let Some(strategy) = outcome {
                return self.explained(strategy, rule, &detail, evaluated);
            }
        }
        self.explained(Strategy::Llm, Rule::Default, "no earlier rule matched", evaluated)
    }

    fn explained(
        &self,
        strategy: Strategy,
        rule: Rule,
        detail: &str,
        evaluated: Vec<RuleEvaluation>,
    ) -> StrategyExplanation {
        StrategyExplanation {
            decision: StrategyDecision {
                strategy,
                reasons: vec![format!("{}: {detail}", rule.name())],
                estimated_cost: self.estimated_cost(strategy),
            },
            evaluated,
        }
    }

    /// Relative cost units: template is free, hybrid sits below llm.
    pub fn estimated_cost(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Template => 0.0,
            Strategy::Hybrid => self.config.hybrid_cost,
            Strategy::Llm => self.config.llm_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stridechat_core::Sentiment;

    const ALL_INTENTS: [Intent; 9] = [
        Intent::Greeting,
        Intent::Thanks,
        Intent::Farewell,
        Intent::StepsNotSyncing,
        Intent::BatteryOptimization,
        Intent::PermissionDenied,
        Intent::WrongStepCount,
        Intent::General,
        Intent::Unknown,
    ];

    fn selector() -> StrategySelector {
        StrategySelector::new(&StrategyConfig::default())
    }

    fn ctx(sentiment: Sentiment, turn_count: usize) -> ConversationContext {
        ConversationContext {
            sentiment,
            frustration_score: if sentiment.is_frustrated() { 4.0 } else { 0.0 },
            turn_count,
            ..Default::default()
        }
    }

    #[test]
    fn greeting_is_always_template() {
        let s = selector();
        for sentiment in [Sentiment::Neutral, Sentiment::Negative, Sentiment::Frustrated] {
            for confidence in [0.0, 0.5, 1.0] {
                let d = s.select(Intent::Greeting, &ctx(sentiment, 10), confidence);
                assert_eq!(d.strategy, Strategy::Template);
                assert_eq!(d.estimated_cost, 0.0);
            }
        }
    }

    #[test]
    fn frustration_means_llm_outside_simple_set() {
        let s = selector();
        for intent in ALL_INTENTS {
            let d = s.select(intent, &ctx(Sentiment::Frustrated, 1), 0.99);
            let expected = if intent.is_simple() { Strategy::Template } else { Strategy::Llm };
            assert_eq!(d.strategy, expected, "intent {intent}");
        }
    }

    #[test]
    fn frustrated_sync_complaint_selects_llm_not_hybrid() {
        let d = selector().select(Intent::StepsNotSyncing, &ctx(Sentiment::Frustrated, 2), 0.85);
        assert_eq!(d.strategy, Strategy::Llm);
        assert!(d.reasons[0].starts_with("frustrated"));
    }

    #[test]
    fn confident_diagnostic_is_hybrid() {
        let s = selector();
        let d = s.select(Intent::BatteryOptimization, &ctx(Sentiment::Negative, 8), 0.9);
        assert_eq!(d.strategy, Strategy::Hybrid);

        let low = s.select(Intent::BatteryOptimization, &ctx(Sentiment::Neutral, 1), 0.84);
        assert_eq!(low.strategy, Strategy::Llm);
        assert!(low.reasons[0].starts_with("low_confidence"));
    }

    #[test]
    fn long_and_default_paths() {
        let s = selector();
        let long = s.select(Intent::General, &ctx(Sentiment::Neutral, 4), 0.9);
        assert_eq!(long.strategy, Strategy::Llm);
        assert!(long.reasons[0].starts_with("long_conversation"));

        let short = s.select(Intent::General, &ctx(Sentiment::Neutral, 3), 0.9);
        assert_eq!(short.strategy, Strategy::Llm);
        assert!(short.reasons[0].starts_with("default"));
    }

    #[test]
    fn costs_are_ordered() {
        let s = selector();
        let template = s.estimated_cost(Strategy::Template);
        let hybrid = s.estimated_cost(Strategy::Hybrid);
        let llm = s.estimated_cost(Strategy::Llm);
        assert!(template < hybrid && hybrid < llm);
    }

    #[test]
    fn explain_matches_select() {
        let s = selector();
        for intent in ALL_INTENTS {
            for sentiment in [Sentiment::Positive, Sentiment::Frustrated] {
                for (turns, confidence) in [(0, 0.3), (5, 0.95)] {
                    let c = ctx(sentiment, turns);
                    let explained = s.explain(intent, &c, confidence);
                    assert_eq!(explained.decision, s.select(intent, &c, confidence));
                    let last = explained.evaluated.last().unwrap();
                    assert!(last.matched);
                    assert!(explained.evaluated[..explained.evaluated.len() - 1].iter().all(|r| !r.matched));
                }
            }
        }
    }

    #[test]
    fn explain_lists_rules_in_order() {
        let e = selector().explain(Intent::Unknown, &ctx(Sentiment::Neutral, 0), 0.9);
        let names: Vec<_> = e.evaluated.iter().map(|r| r.rule).collect();
        assert_eq!(
            names,
            ["simple_intent", "frustrated", "low_confidence", "diagnostic_intent", "long_conversation", "default"]
        );
    }

    #[test]
    fn override_flag_routes_frustrated_greetings_to_llm() {
        let s = StrategySelector::new(&StrategyConfig {
            frustration_overrides_simple_intents: true,
            ..StrategyConfig::default()
        });
        let frustrated = s.select(Intent::Thanks, &ctx(Sentiment::Frustrated, 1), 0.95);
        assert_eq!(frustrated.strategy, Strategy::Llm);

        let calm = s.select(Intent::Thanks, &ctx(Sentiment::Neutral, 1), 0.95);
        assert_eq!(calm.strategy, Strategy::Template);

        let e = s.explain(Intent::Thanks, &ctx(Sentiment::Neutral, 1), 0.95);
        assert_eq!(e.evaluated[0].rule, "frustrated");
    }
}
