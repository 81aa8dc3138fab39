//! Lexical intent and sentiment analysis.
//!
//! Keyword tables over normalized, already-sanitized text. Apps and devices
//! are only visible as `[APP]` / `[DEVICE]` placeholders, so entity tracking
//! records that one was mentioned, never which one.

use async_trait::async_trait;
use stridechat_core::{
    Classification, ContextAnalyzer, ConversationContext, Entities, Intent, IntentClassifier,
    Message, Sentiment,
};

/// User turns considered for sentiment.
pub const SENTIMENT_WINDOW: usize = 3;

/// Frustration score at which sentiment becomes [`Sentiment::Frustrated`].
pub const FRUSTRATION_THRESHOLD: f32 = 3.0;

const CARRY_OVER_CONFIDENCE: f32 = 0.85;

const GREETING: &[&str] = &["hi", "hello", "hey", "hiya", "good morning", "good afternoon", "good evening"];
const THANKS: &[&str] = &["thanks", "thank you", "thx", "ty", "appreciate it", "cheers"];
const FAREWELL: &[&str] = &["bye", "goodbye", "see you", "see ya", "thats all", "have a good one"];

const STEPS_NOT_SYNCING: &[&str] = &[
    "sync",
    "syncing",
    "synced",
    "not updating",
    "not showing",
    "missing steps",
    "steps missing",
    "didnt update",
    "stuck at",
];
const BATTERY: &[&str] = &[
    "battery",
    "battery saver",
    "power saving",
    "low power",
    "drain",
    "draining",
    "background",
    "optimization",
];
const PERMISSION: &[&str] = &[
    "permission",
    "permissions",
    "denied",
    "access",
    "allow",
    "physical activity",
    "motion",
];
const WRONG_COUNT: &[&str] = &[
    "wrong",
    "inaccurate",
    "incorrect",
    "too low",
    "too high",
    "miscount",
    "undercount",
    "overcount",
    "doesnt match",
    "double counted",
];
const GENERAL: &[&str] = &["step", "steps", "tracker", "tracking", "walk", "walked", "walking", "goal", "pedometer"];

const STRONG_NEGATIVE: &[&str] = &[
    "annoying",
    "annoyed",
    "frustrating",
    "frustrated",
    "ridiculous",
    "useless",
    "terrible",
    "awful",
    "hate",
    "worst",
    "angry",
    "stupid",
    "garbage",
    "fed up",
    "sick of",
];
const PROBLEM: &[&str] = &[
    "broken",
    "problem",
    "issue",
    "still",
    "again",
    "stuck",
    "not working",
    "doesnt work",
    "wont",
    "cant",
    "never",
];
const POSITIVE: &[&str] = &["great", "perfect", "awesome", "love", "helpful", "fixed", "works", "working now", "thanks", "thank you"];

// Diagnostic tables in tie-break priority order.
const DIAGNOSTIC: &[(Intent, &[&str])] = &[
    (Intent::StepsNotSyncing, STEPS_NOT_SYNCING),
    (Intent::PermissionDenied, PERMISSION),
    (Intent::BatteryOptimization, BATTERY),
    (Intent::WrongStepCount, WRONG_COUNT),
];

const SIMPLE: &[(Intent, &[&str])] = &[
    (Intent::Thanks, THANKS),
    (Intent::Farewell, FAREWELL),
    (Intent::Greeting, GREETING),
];

/// Lowercased words joined by single spaces and padded on both ends, so a
/// phrase matches with `contains(" phrase ")`. Apostrophes are dropped
/// (`"aren't"` becomes `"arent"`).
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    for word in text
        .chars()
        .filter(|c| *c != '\'' && *c != '\u{2019}')
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
    {
        out.push_str(word);
        out.push(' ');
    }
    out
}

fn hits(padded: &str, lexicon: &[&str]) -> usize {
    lexicon
        .iter()
        .filter(|phrase| padded.contains(&format!(" {phrase} ")))
        .count()
}

/// Keyword-based classifier and context analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalAnalyzer;

impl LexicalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classify one text in isolation.
    pub fn classify_text(&self, text: &str) -> Classification {
        let padded = normalize(text);

        let mut diagnostic: Vec<(Intent, usize)> = DIAGNOSTIC
            .iter()
            .map(|(intent, lexicon)| (*intent, hits(&padded, lexicon)))
            .filter(|(_, n)| *n > 0)
            .collect();
        // Stable sort keeps table order for equal hit counts.
        diagnostic.sort_by(|a, b| b.1.cmp(&a.1));

        if let Some(&(intent, best)) = diagnostic.first() {
            let tied = diagnostic.get(1).is_some_and(|(_, n)| *n == best);
            let confidence = if tied {
                0.6
            } else if best >= 2 {
                0.95
            } else {
                0.9
            };
            return Classification { intent, confidence };
        }

        if let Some((intent, _)) = SIMPLE.iter().find(|(_, lexicon)| hits(&padded, lexicon) > 0) {
            return Classification {
                intent: *intent,
                confidence: 0.95,
            };
        }

        if hits(&padded, GENERAL) > 0 {
            return Classification {
                intent: Intent::General,
                confidence: 0.6,
            };
        }

        Classification {
            intent: Intent::Unknown,
            confidence: 0.3,
        }
    }

    /// Most recent diagnostic intent among prior user turns.
    fn last_problem(&self, history: &[Message]) -> Option<Intent> {
        history
            .iter()
            .rev()
            .filter(|m| m.is_user())
            .map(|m| self.classify_text(&m.text).intent)
            .find(Intent::is_diagnostic)
    }

    /// Frustration score of a single user turn.
    pub fn frustration_score(&self, text: &str) -> f32 {
        let padded = normalize(text);
        let mut score = 2 * hits(&padded, STRONG_NEGATIVE) + hits(&padded, PROBLEM);

        let exclamations = text.chars().filter(|c| *c == '!').count();
        let words = text.split_whitespace().count().max(1);
        if exclamations as f32 / words as f32 >= 0.5 {
            score += 2;
        } else if exclamations > 0 {
            score += 1;
        }
        score as f32
    }
}

#[async_trait]
impl IntentClassifier for LexicalAnalyzer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn classify(&self, text: &str, history: &[Message]) -> Classification {
        let current = self.classify_text(text);
        if matches!(current.intent, Intent::General | Intent::Unknown) {
            // A follow-up like "still nothing" continues the open problem.
            if let Some(intent) = self.last_problem(history) {
                return Classification {
                    intent,
                    confidence: CARRY_OVER_CONFIDENCE,
                };
            }
        }
        current
    }
}

impl ContextAnalyzer for LexicalAnalyzer {
    fn analyze(&self, history: &[Message]) -> ConversationContext {
        let recent: Vec<&Message> = history
            .iter()
            .rev()
            .filter(|m| m.is_user())
            .take(SENTIMENT_WINDOW)
            .collect();

        let score: f32 = recent.iter().map(|m| self.frustration_score(&m.text)).sum();
        let positive = recent
            .first()
            .is_some_and(|m| hits(&normalize(&m.text), POSITIVE) > 0);

        let sentiment = if score >= FRUSTRATION_THRESHOLD {
            Sentiment::Frustrated
        } else if score >= 1.0 {
            Sentiment::Negative
        } else if positive {
            Sentiment::Positive
        } else {
            Sentiment::Neutral
        };

        let user_turns = history.iter().filter(|m| m.is_user());
        let entities = Entities {
            app: user_turns.clone().any(|m| m.text.contains("[APP]")),
            device: user_turns.clone().any(|m| m.text.contains("[DEVICE]")),
            problem: self.last_problem(history).map(|i| i.as_str().to_string()),
        };

        ConversationContext {
            sentiment,
            frustration_score: score,
            turn_count: user_turns.count(),
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stridechat_core::{Role, SessionId};

    fn user(text: &str) -> Message {
        Message::new(SessionId::from("s"), Role::User, text, 0)
    }

    fn assistant(text: &str) -> Message {
        Message::new(SessionId::from("s"), Role::Assistant, text, 0)
    }

    #[test]
    fn normalize_pads_and_strips_punctuation() {
        assert_eq!(normalize("My steps AREN'T syncing!!"), " my steps arent syncing ");
        assert_eq!(normalize(""), " ");
    }

    #[test]
    fn simple_intents_are_confident() {
        let a = LexicalAnalyzer::new();
        assert_eq!(a.classify_text("Hello there").intent, Intent::Greeting);
        assert_eq!(a.classify_text("thank you so much").intent, Intent::Thanks);
        assert_eq!(a.classify_text("ok bye").intent, Intent::Farewell);
        assert_eq!(a.classify_text("hi").confidence, 0.95);
    }

    #[test]
    fn diagnostic_beats_greeting() {
        let c = LexicalAnalyzer::new().classify_text("Hi, my steps aren't syncing");
        assert_eq!(c.intent, Intent::StepsNotSyncing);
        assert_eq!(c.confidence, 0.9);
    }

    #[test]
    fn confidence_tracks_evidence() {
        let a = LexicalAnalyzer::new();
        let strong = a.classify_text("battery saver keeps draining my phone");
        assert_eq!(strong.intent, Intent::BatteryOptimization);
        assert_eq!(strong.confidence, 0.95);

        let ambiguous = a.classify_text("wrong permission");
        assert_eq!(ambiguous.intent, Intent::PermissionDenied);
        assert_eq!(ambiguous.confidence, 0.6);

        let general = a.classify_text("how do I set a step goal");
        assert_eq!(general.intent, Intent::General);
        assert_eq!(general.confidence, 0.6);

        let unknown = a.classify_text("what's the weather");
        assert_eq!(unknown.intent, Intent::Unknown);
        assert_eq!(unknown.confidence, 0.3);
    }

    #[tokio::test]
    async fn follow_up_carries_open_problem() {
        let a = LexicalAnalyzer::new();
        let history = vec![user("my steps are not syncing"), assistant("Try opening the app.")];
        let c = a.classify("this is so annoying!!!", &history).await;
        assert_eq!(c.intent, Intent::StepsNotSyncing);
        assert_eq!(c.confidence, CARRY_OVER_CONFIDENCE);

        let fresh = a.classify("this is so annoying!!!", &[]).await;
        assert_eq!(fresh.intent, Intent::Unknown);
    }

    #[test]
    fn exclamations_and_strong_words_frustrate() {
        let a = LexicalAnalyzer::new();
        assert_eq!(a.frustration_score("this is so annoying!!!"), 4.0);
        assert_eq!(a.frustration_score("my steps are not syncing"), 0.0);
        assert_eq!(a.frustration_score("it is still broken!"), 3.0);

        let ctx = a.analyze(&[user("my steps are not syncing"), user("this is so annoying!!!")]);
        assert_eq!(ctx.sentiment, Sentiment::Frustrated);
        assert_eq!(ctx.frustration_score, 4.0);
    }

    #[test]
    fn sentiment_window_is_last_three_user_turns() {
        let a = LexicalAnalyzer::new();
        let mut history = vec![user("this is useless and terrible")];
        for _ in 0..3 {
            history.push(user("ok"));
            history.push(assistant("Anything else?"));
        }
        assert_eq!(a.analyze(&history).sentiment, Sentiment::Neutral);

        history.push(user("the problem is back"));
        assert_eq!(a.analyze(&history).sentiment, Sentiment::Negative);
    }

    #[test]
    fn positive_only_from_latest_turn() {
        let a = LexicalAnalyzer::new();
        let ctx = a.analyze(&[user("hello"), user("that worked, great")]);
        assert_eq!(ctx.sentiment, Sentiment::Positive);
    }

    #[test]
    fn tracks_turns_and_entities() {
        let a = LexicalAnalyzer::new();
        let history = vec![
            user("my [DEVICE] lost [NUMBER] steps"),
            assistant("Which app do you use?"),
            user("[APP] shows the wrong total"),
        ];
        let ctx = a.analyze(&history);
        assert_eq!(ctx.turn_count, 2);
        assert!(ctx.entities.app);
        assert!(ctx.entities.device);
        assert_eq!(ctx.entities.problem.as_deref(), Some("wrong_step_count"));

        let empty = a.analyze(&[]);
        assert_eq!(empty, ConversationContext::default());
    }
}
