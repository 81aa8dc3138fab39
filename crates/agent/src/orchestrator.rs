//! The conversation pipeline.
//!
//! ```text
//! raw text ─▶ sanitize ─▶ append(user) ─▶ classify + analyze ─▶ select strategy
//!                                                                   │
//!        template ◀──────────────────────────────────────────────────┤
//!        llm / hybrid ─▶ trim history ─▶ breaker ─▶ remote ─▶ (fallback on error)
//!                                                                   │
//!                                           redact ─▶ append(assistant) ─▶ Reply
//! ```
//!
//! Session locks are only held inside the memory manager's own calls, so the
//! remote call never runs under one. Every path yields a reply except a
//! strict-mode sanitization failure.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use stridechat_config::AppConfig;
use stridechat_core::{
    Classification, ContextAnalyzer, ConversationContext, Diagnostics, Error, Intent,
    IntentClassifier, LlmClient, LlmRequest, Message, MessageStore, Result, Role, SessionId,
};
use stridechat_memory::{LockStats, MemoryManager, MemoryStats, SessionUsage};
use stridechat_providers::{BreakerMetrics, CircuitBreaker, CircuitPhase, GuardedClient};
use stridechat_security::{
    AuditEvent, AuditLogger, AuditOutcome, PhiSanitizer, SanitizationResult, TracingSink,
};
use tracing::{debug, info, warn};

use crate::analysis::LexicalAnalyzer;
use crate::context::{CacheStats, PromptAssembler, PromptInput, TokenCounter};
use crate::strategy::{Strategy, StrategyDecision, StrategyExplanation, StrategySelector};
use crate::templates;

/// A user-visible answer and how it was produced.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub session_id: SessionId,
    /// Stored assistant text, already redacted.
    pub text: String,
    pub decision: StrategyDecision,
    pub classification: Classification,
    pub context: ConversationContext,
    /// The remote path failed and a template answered.
    pub fallback_used: bool,
    /// Placeholders inserted into the user's text.
    pub redactions: usize,
    /// Id of the stored assistant message.
    pub message_id: String,
}

/// Dry run of the decision for a hypothetical next message.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub sanitized_text: String,
    pub classification: Classification,
    pub context: ConversationContext,
    pub explanation: StrategyExplanation,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetrics {
    pub requests: u64,
    pub blocked: u64,
    pub template_replies: u64,
    pub llm_replies: u64,
    pub hybrid_replies: u64,
    pub fallbacks: u64,
    pub breaker: BreakerMetrics,
    pub memory: MemoryStats,
    pub token_cache: CacheStats,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    blocked: AtomicU64,
    template: AtomicU64,
    llm: AtomicU64,
    hybrid: AtomicU64,
    fallbacks: AtomicU64,
}

/// Ties sanitizer, memory, classifier, selector and the guarded remote
/// endpoint together.
pub struct Orchestrator {
    sanitizer: PhiSanitizer,
    tokens: Arc<TokenCounter>,
    prompts: PromptAssembler,
    selector: StrategySelector,
    classifier: Arc<dyn IntentClassifier>,
    analyzer: Arc<dyn ContextAnalyzer>,
    memory: MemoryManager,
    client: Arc<dyn LlmClient>,
    remote: GuardedClient,
    audit: Arc<AuditLogger>,
    counters: Counters,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sanitizer", &self.sanitizer)
            .field("classifier", &self.classifier.name())
            .field("memory", &self.memory)
            .field("remote", &self.remote)
            .finish()
    }
}

impl Orchestrator {
    /// Build the pipeline from configuration. The breaker for `client` is
    /// created here; use [`with_breaker`](Self::with_breaker) to share one.
    pub fn new(config: &AppConfig, store: Arc<dyn MessageStore>, client: Arc<dyn LlmClient>) -> Result<Self> {
        let sanitizer = PhiSanitizer::new(&config.sanitizer).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let tokens = Arc::new(TokenCounter::new(&config.tokens, &config.model));
        let prompts = PromptAssembler::new(
            config.model.clone(),
            config.system_prompt.clone(),
            config.remote_timeout(),
            tokens.clone(),
        );
        let memory = MemoryManager::new(&config.memory, store).with_estimator(tokens.clone());
        let breaker = Arc::new(CircuitBreaker::new(config.endpoint.clone(), &config.breaker));
        let analyzer = Arc::new(LexicalAnalyzer::new());

        info!(
            model = %config.model,
            endpoint = %config.endpoint,
            policy = ?sanitizer.policy(),
            store = %memory.store_name(),
            "Orchestrator ready"
        );

        Ok(Self {
            sanitizer,
            tokens,
            prompts,
            selector: StrategySelector::new(&config.strategy),
            classifier: analyzer.clone(),
            analyzer,
            memory,
            remote: GuardedClient::new(client.clone(), breaker),
            client,
            audit: Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)])),
            counters: Counters::default(),
        })
    }

    /// Route remote calls through a shared breaker for the same endpoint.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.remote = GuardedClient::new(self.client.clone(), breaker);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ContextAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.remote.breaker()
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn tokens(&self) -> &TokenCounter {
        &self.tokens
    }

    fn sanitize(&self, session_id: &SessionId, raw: &str) -> Result<SanitizationResult> {
        match self.sanitizer.sanitize(raw) {
            Ok(result) => {
                if result.had_phi {
                    self.audit_redaction(session_id, &result);
                }
                Ok(result)
            }
            Err(e) => {
                self.counters.blocked.fetch_add(1, Ordering::Relaxed);
                warn!(session_id = %session_id, text_len = raw.len(), "Transmission blocked: residual PHI");
                self.audit.log(
                    AuditEvent::TransmissionBlocked { text_len: raw.len() },
                    session_id.as_str(),
                    AuditOutcome::Denied,
                    None,
                );
                Err(e.into())
            }
        }
    }

    fn audit_redaction(&self, session_id: &SessionId, result: &SanitizationResult) {
        self.audit.log(
            AuditEvent::PhiRedacted {
                categories: result.replacements.iter().map(|r| r.category.to_string()).collect(),
                count: result.total_replacements(),
            },
            session_id.as_str(),
            AuditOutcome::Success,
            None,
        );
    }

    /// Answer one user message.
    ///
    /// The only error is [`Error::Sanitization`] under the strict policy;
    /// in that case nothing is stored and nothing is sent.
    pub async fn respond(
        &self,
        session_id: &SessionId,
        raw_text: &str,
        diagnostics: Option<&Diagnostics>,
    ) -> Result<Reply> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let sanitized = self.sanitize(session_id, raw_text)?;

        let user_message = self
            .memory
            .add_message(session_id, sanitized.sanitized_text.clone(), Role::User)
            .await;
        let history = self.memory.get_history(session_id).await;
        let prior: Vec<Message> = history
            .iter()
            .filter(|m| m.id != user_message.id)
            .cloned()
            .collect();

        let classification = self.classifier.classify(&user_message.text, &prior).await;
        let context = self.analyzer.analyze(&history);
        let decision = self
            .selector
            .select(classification.intent, &context, classification.confidence);
        self.count_strategy(decision.strategy);
        debug!(
            session_id = %session_id,
            intent = %classification.intent,
            confidence = classification.confidence,
            sentiment = ?context.sentiment,
            strategy = %decision.strategy,
            "Strategy selected"
        );

        let intent = classification.intent;
        let (text, fallback_used) = match decision.strategy {
            Strategy::Template => (
                templates::template_for(intent)
                    .map(str::to_string)
                    .unwrap_or_else(|| templates::fallback_reply(intent)),
                false,
            ),
            strategy => {
                let request = self.prompts.build(PromptInput {
                    prompt: &user_message.text,
                    prompt_id: &user_message.id,
                    history: &history,
                    diagnostics,
                    fragment_only: strategy == Strategy::Hybrid,
                });
                match self.call_remote(session_id, request).await {
                    Ok(content) if strategy == Strategy::Hybrid => (templates::compose_hybrid(intent, &content), false),
                    Ok(content) if !content.trim().is_empty() => (content, false),
                    Ok(_) => (self.fall_back(session_id, intent, "empty completion"), true),
                    Err(e) => (self.fall_back(session_id, intent, &e.to_string()), true),
                }
            }
        };

        // Generated text can echo identifiers back; store it redacted.
        let redacted = self.sanitizer.redact(&text);
        if redacted.had_phi {
            self.audit_redaction(session_id, &redacted);
        }
        let stored = self
            .memory
            .add_message(session_id, redacted.sanitized_text, Role::Assistant)
            .await;

        Ok(Reply {
            session_id: session_id.clone(),
            text: stored.text,
            decision,
            classification,
            context,
            fallback_used,
            redactions: sanitized.total_replacements(),
            message_id: stored.id,
        })
    }

    async fn call_remote(&self, session_id: &SessionId, request: LlmRequest) -> Result<String> {
        let breaker = self.remote.breaker();
        let before = breaker.phase();
        let outcome = self.remote.call(request).await;
        let after = breaker.phase();

        if before != after {
            let endpoint = breaker.endpoint().to_string();
            match after {
                CircuitPhase::Open => self.audit.log(
                    AuditEvent::CircuitOpened { endpoint },
                    session_id.as_str(),
                    AuditOutcome::Failure,
                    None,
                ),
                CircuitPhase::Closed => self.audit.log(
                    AuditEvent::CircuitClosed { endpoint },
                    session_id.as_str(),
                    AuditOutcome::Success,
                    None,
                ),
                CircuitPhase::HalfOpen => {}
            }
        }

        outcome.map(|response| {
            debug!(
                session_id = %session_id,
                tokens = response.token_count,
                latency_ms = response.latency.as_millis() as u64,
                "Remote completion"
            );
            response.content
        })
    }

    fn fall_back(&self, session_id: &SessionId, intent: Intent, reason: &str) -> String {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(session_id = %session_id, reason, "Remote path failed, answering from templates");
        self.audit.log(
            AuditEvent::RemoteFallback { reason: reason.to_string() },
            session_id.as_str(),
            AuditOutcome::Failure,
            None,
        );
        templates::fallback_reply(intent)
    }

    fn count_strategy(&self, strategy: Strategy) {
        let counter = match strategy {
            Strategy::Template => &self.counters.template,
            Strategy::Llm => &self.counters.llm,
            Strategy::Hybrid => &self.counters.hybrid,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Decide what `raw_text` would get in `session_id` without storing it
    /// or calling the endpoint.
    pub async fn preview(&self, session_id: &SessionId, raw_text: &str) -> Result<Preview> {
        let sanitized = self.sanitizer.sanitize(raw_text)?;
        let prior = self.memory.get_history(session_id).await;
        let classification = self.classifier.classify(&sanitized.sanitized_text, &prior).await;

        let mut history = prior;
        history.push(Message::user(session_id.clone(), sanitized.sanitized_text.clone()));
        let context = self.analyzer.analyze(&history);
        let explanation = self
            .selector
            .explain(classification.intent, &context, classification.confidence);

        Ok(Preview {
            sanitized_text: sanitized.sanitized_text,
            classification,
            context,
            explanation,
        })
    }

    pub async fn history(&self, session_id: &SessionId) -> Vec<Message> {
        self.memory.get_history(session_id).await
    }

    pub async fn session_usage(&self, session_id: &SessionId) -> Option<SessionUsage> {
        self.memory.get_session_usage(session_id).await
    }

    /// Drop a session from memory and the store.
    pub async fn clear_session(&self, session_id: &SessionId) -> Result<bool> {
        let removed = self.memory.clear_session(session_id).await?;
        self.audit.log(
            AuditEvent::SessionCleared { removed_from_store: removed },
            session_id.as_str(),
            AuditOutcome::Success,
            None,
        );
        Ok(removed)
    }

    /// Force the breaker closed.
    pub fn reset_circuit(&self) {
        let breaker = self.remote.breaker();
        breaker.reset();
        self.audit.log(
            AuditEvent::ManualReset {
                endpoint: breaker.endpoint().to_string(),
            },
            "system",
            AuditOutcome::Success,
            None,
        );
    }

    pub fn evict_idle(&self, ttl: Duration) -> usize {
        self.memory.evict_idle(ttl)
    }

    /// Sweep sessions idle longer than `memory.idle_ttl_secs`.
    pub fn evict_expired(&self) -> usize {
        self.memory.evict_idle(self.memory.idle_ttl())
    }

    pub fn idle_ttl(&self) -> Duration {
        self.memory.idle_ttl()
    }

    pub fn lock_stats(&self) -> LockStats {
        self.memory.get_lock_stats()
    }

    pub async fn metrics(&self) -> OrchestratorMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        OrchestratorMetrics {
            requests: load(&self.counters.requests),
            blocked: load(&self.counters.blocked),
            template_replies: load(&self.counters.template),
            llm_replies: load(&self.counters.llm),
            hybrid_replies: load(&self.counters.hybrid),
            fallbacks: load(&self.counters.fallbacks),
            breaker: self.remote.breaker().metrics(),
            memory: self.memory.get_stats().await,
            token_cache: self.tokens.cache_stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use stridechat_config::SanitizerPolicy;
    use stridechat_core::error::RemoteCallError;
    use stridechat_core::{LlmResponse, Sentiment};
    use stridechat_memory::InMemoryStore;

    /// Replays scripted outcomes and records every request it receives.
    #[derive(Default)]
    struct ScriptedClient {
        script: Mutex<VecDeque<std::result::Result<String, RemoteCallError>>>,
        requests: Mutex<Vec<LlmRequest>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn replying(replies: &[&str]) -> Arc<Self> {
            let client = Self::default();
            client
                .script
                .lock()
                .unwrap()
                .extend(replies.iter().map(|r| Ok(r.to_string())));
            Arc::new(client)
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_request(&self) -> LlmRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn call(&self, request: LlmRequest) -> std::result::Result<LlmResponse, RemoteCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(content)) => Ok(LlmResponse {
                    content,
                    token_count: 12,
                    latency: Duration::from_millis(5),
                }),
                Some(Err(e)) => Err(e),
                None => Err(RemoteCallError::ApiError {
                    status_code: 503,
                    message: "unavailable".into(),
                }),
            }
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.memory.max_messages = 20;
        config
    }

    fn orchestrator(client: Arc<ScriptedClient>) -> Orchestrator {
        Orchestrator::new(&config(), Arc::new(InMemoryStore::new()), client).unwrap()
    }

    #[tokio::test]
    async fn greeting_uses_template_without_remote_call() {
        let client = ScriptedClient::replying(&[]);
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s1");

        let reply = orch.respond(&sid, "hello!", None).await.unwrap();
        assert_eq!(reply.decision.strategy, Strategy::Template);
        assert!(!reply.fallback_used);
        assert_eq!(client.calls(), 0);
        assert_eq!(orch.history(&sid).await.len(), 2);
    }

    #[tokio::test]
    async fn remote_sees_only_sanitized_text() {
        let client = ScriptedClient::replying(&["Sounds like a sync delay."]);
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s1");

        let reply = orch
            .respond(&sid, "I walked 10,000 steps yesterday but Fitbit shows nothing", None)
            .await
            .unwrap();
        assert!(reply.redactions >= 3);

        let request = client.last_request();
        assert!(!request.prompt.contains("10,000"));
        assert!(!request.prompt.to_lowercase().contains("yesterday"));
        assert!(!request.prompt.to_lowercase().contains("fitbit"));
        assert!(request.prompt.contains("[NUMBER]"));
        assert!(request.history.is_empty());

        let stored = orch.history(&sid).await;
        assert!(stored.iter().all(|m| !m.text.contains("10,000")));
    }

    #[tokio::test]
    async fn hybrid_appends_fragment_and_renders_diagnostics() {
        let client = ScriptedClient::replying(&["Your permission is currently denied."]);
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s1");
        let mut diag = Diagnostics::new();
        diag.insert("activity_permission".into(), serde_json::json!("denied"));

        let reply = orch
            .respond(&sid, "the app says activity permission denied", Some(&diag))
            .await
            .unwrap();
        assert_eq!(reply.decision.strategy, Strategy::Hybrid);
        assert!(reply.text.starts_with("Step tracking needs activity permissions"));
        assert!(reply.text.ends_with("Your permission is currently denied."));

        let request = client.last_request();
        assert!(request.system_prompt.contains("[Diagnostics]"));
        assert!(request.system_prompt.contains("activity_permission"));
    }

    #[tokio::test]
    async fn remote_failure_falls_back_and_is_audited() {
        let client = ScriptedClient::failing();
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s1");

        let reply = orch.respond(&sid, "my steps are not syncing", None).await.unwrap();
        assert!(reply.fallback_used);
        assert!(!reply.text.is_empty());
        assert_eq!(client.calls(), 1);

        let metrics = orch.metrics().await;
        assert_eq!(metrics.fallbacks, 1);
        assert_eq!(metrics.breaker.total_failures, 1);
        assert!(orch
            .audit()
            .entries()
            .iter()
            .any(|e| matches!(e.event, AuditEvent::RemoteFallback { .. })));
    }

    #[tokio::test]
    async fn open_circuit_skips_remote_and_audits_transition() {
        let client = ScriptedClient::failing();
        let orch = orchestrator(client.clone());

        for i in 0..5 {
            let sid = SessionId(format!("s{i}"));
            orch.respond(&sid, "what's new", None).await.unwrap();
        }
        assert_eq!(orch.breaker().phase(), CircuitPhase::Open);
        assert_eq!(client.calls(), 5);

        let reply = orch.respond(&SessionId::from("late"), "what's new", None).await.unwrap();
        assert!(reply.fallback_used);
        assert_eq!(client.calls(), 5);
        assert_eq!(
            orch.audit()
                .entries()
                .iter()
                .filter(|e| matches!(e.event, AuditEvent::CircuitOpened { .. }))
                .count(),
            1
        );

        orch.reset_circuit();
        assert_eq!(orch.breaker().phase(), CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn strict_policy_blocks_and_stores_nothing() {
        let mut config = config();
        config.sanitizer.policy = SanitizerPolicy::Strict;
        let client = ScriptedClient::replying(&["unused"]);
        let orch = Orchestrator::new(&config, Arc::new(InMemoryStore::new()), client.clone()).unwrap();
        let sid = SessionId::from("s1");

        let err = orch.respond(&sid, "my steps reset on March 3", None).await.unwrap_err();
        assert!(matches!(err, Error::Sanitization(_)));
        assert!(!err.to_string().contains("March"));
        assert_eq!(client.calls(), 0);
        assert!(orch.history(&sid).await.is_empty());
        assert_eq!(orch.metrics().await.blocked, 1);
    }

    #[tokio::test]
    async fn frustrated_follow_up_goes_to_llm() {
        let client = ScriptedClient::replying(&["Sorry about that.", "Let's dig in."]);
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s1");

        let first = orch.respond(&sid, "my steps are not syncing", None).await.unwrap();
        assert_eq!(first.decision.strategy, Strategy::Hybrid);

        let second = orch.respond(&sid, "this is so annoying!!!", None).await.unwrap();
        assert_eq!(second.classification.intent, Intent::StepsNotSyncing);
        assert_eq!(second.context.sentiment, Sentiment::Frustrated);
        assert_eq!(second.decision.strategy, Strategy::Llm);

        // Prior turns go in history; the current one only as the prompt.
        let request = client.last_request();
        assert_eq!(request.prompt, "this is so annoying!!!");
        assert_eq!(request.history.len(), 2);
    }

    #[tokio::test]
    async fn preview_does_not_store() {
        let orch = orchestrator(ScriptedClient::replying(&[]));
        let sid = SessionId::from("s1");
        let preview = orch.preview(&sid, "battery saver keeps killing it").await.unwrap();
        assert_eq!(preview.explanation.decision.strategy, Strategy::Hybrid);
        assert_eq!(preview.context.turn_count, 1);
        assert!(orch.history(&sid).await.is_empty());
    }

    #[tokio::test]
    async fn clear_session_is_audited() {
        let orch = orchestrator(ScriptedClient::replying(&[]));
        let sid = SessionId::from("s1");
        orch.respond(&sid, "thanks", None).await.unwrap();

        assert!(orch.clear_session(&sid).await.unwrap());
        assert!(orch.history(&sid).await.is_empty());
        assert!(orch
            .audit()
            .entries_for_session("s1")
            .iter()
            .any(|e| matches!(e.event, AuditEvent::SessionCleared { .. })));
    }

    #[tokio::test]
    async fn expired_sessions_follow_configured_ttl() {
        let client = ScriptedClient::replying(&[]);
        let orch = orchestrator(client.clone());
        let sid = SessionId::from("s1");
        orch.respond(&sid, "thanks", None).await.unwrap();
        assert_eq!(orch.idle_ttl(), Duration::from_secs(1800));
        assert_eq!(orch.evict_expired(), 0);
        assert!(orch.session_usage(&sid).await.is_some());

        let mut config = config();
        config.memory.idle_ttl_secs = 0;
        let eager = Orchestrator::new(&config, Arc::new(InMemoryStore::new()), client).unwrap();
        eager.respond(&sid, "thanks", None).await.unwrap();
        assert_eq!(eager.evict_expired(), 1);
        assert!(eager.session_usage(&sid).await.is_none());
        assert_eq!(eager.history(&sid).await.len(), 2);
    }
}
