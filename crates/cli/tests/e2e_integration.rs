//! End-to-end integration tests for the StrideChat pipeline.
//!
//! These tests exercise the full path from raw user input to stored reply:
//! sanitization, session memory, strategy selection, the circuit breaker
//! and template fallback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use stridechat_agent::{Orchestrator, Strategy};
use stridechat_config::{AppConfig, BreakerConfig, MemoryConfig, SanitizerConfig, SanitizerPolicy};
use stridechat_core::error::RemoteCallError;
use stridechat_core::{
    Error, Intent, LlmClient, LlmRequest, LlmResponse, MessageStore, Role, Sentiment, SessionId,
};
use stridechat_memory::{FileStore, InMemoryStore, MemoryManager};
use stridechat_providers::{CircuitBreaker, CircuitPhase, GuardedClient};
use stridechat_security::PhiSanitizer;
use tokio::sync::Notify;

// ── Mock LLM ─────────────────────────────────────────────────────────────

/// A mock endpoint that replays scripted outcomes in sequence and fails
/// with a 503 once the script is exhausted.
#[derive(Default)]
struct ScriptedClient {
    script: std::sync::Mutex<VecDeque<Result<String, RemoteCallError>>>,
    requests: std::sync::Mutex<Vec<LlmRequest>>,
    call_count: AtomicUsize,
    /// Prompts containing "wait" block until notified.
    gate: Notify,
}

impl ScriptedClient {
    fn new(replies: &[&str]) -> Arc<Self> {
        let client = Self::default();
        client
            .script
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| Ok(r.to_string())));
        Arc::new(client)
    }

    fn down() -> Arc<Self> {
        Self::new(&[])
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn prompts(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.prompt.clone()).collect()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn call(&self, request: LlmRequest) -> Result<LlmResponse, RemoteCallError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let wait = request.prompt.contains("wait");
        self.requests.lock().unwrap().push(request);
        if wait {
            self.gate.notified().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(LlmResponse {
                content,
                token_count: 8,
                latency: Duration::from_millis(3),
            }),
            Some(Err(e)) => Err(e),
            None => Err(RemoteCallError::ApiError {
                status_code: 503,
                message: "service unavailable".into(),
            }),
        }
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.sanitizer.policy = SanitizerPolicy::Permissive;
    config.memory.max_messages = 20;
    config
}

fn orchestrator(config: &AppConfig, store: Arc<dyn MessageStore>, client: Arc<ScriptedClient>) -> Orchestrator {
    Orchestrator::new(config, store, client).unwrap()
}

// ── E2E: Privacy ─────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_step_count_and_timeframe_are_redacted() {
    let sanitizer = PhiSanitizer::new(&SanitizerConfig::default()).unwrap();
    let result = sanitizer.sanitize("I walked 10,000 steps yesterday").unwrap();

    assert!(!result.sanitized_text.contains("10,000"));
    assert!(!result.sanitized_text.contains("yesterday"));
    assert!(result.sanitized_text.contains("[NUMBER]"));
    assert!(result.sanitized_text.contains("[TIMEFRAME]"));
    assert!(result.had_phi);

    let again = sanitizer.sanitize(&result.sanitized_text).unwrap();
    assert_eq!(again.total_replacements(), 0);
    assert_eq!(again.sanitized_text, result.sanitized_text);
}

#[tokio::test]
async fn e2e_remote_and_store_only_see_sanitized_text() {
    let client = ScriptedClient::new(&["Got it, let's look at your sync settings."]);
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(&test_config(), store.clone(), client.clone());
    let sid = SessionId::from("privacy");

    orch.respond(&sid, "Strava lost 12,345 steps from last week", None)
        .await
        .unwrap();

    let prompts = client.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].contains("12,345"));
    assert!(!prompts[0].to_lowercase().contains("strava"));
    assert!(!prompts[0].to_lowercase().contains("last week"));

    let persisted = store.load_messages(&sid).await.unwrap();
    assert_eq!(persisted.len(), 2);
    for message in &persisted {
        assert!(!message.text.contains("12,345"));
        assert!(!message.text.to_lowercase().contains("strava"));
    }
}

#[tokio::test]
async fn e2e_strict_policy_blocks_before_anything_is_sent() {
    let mut config = test_config();
    config.sanitizer.policy = SanitizerPolicy::Strict;
    let client = ScriptedClient::new(&["never used"]);
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(&config, store.clone(), client.clone());
    let sid = SessionId::from("strict");

    let err = orch
        .respond(&sid, "my steps vanished on Jan 5", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Sanitization(_)));
    assert!(!err.is_recoverable());
    assert!(!err.to_string().contains("Jan"));
    assert_eq!(client.calls(), 0);
    assert!(store.load_messages(&sid).await.unwrap().is_empty());
}

// ── E2E: Session memory ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_bounded_session_keeps_most_recent_messages() {
    let config = MemoryConfig {
        max_messages: 20,
        ..MemoryConfig::default()
    };
    let memory = MemoryManager::new(&config, Arc::new(InMemoryStore::new()));
    let sid = SessionId::from("bounded");

    for i in 1..=25 {
        memory.add_message(&sid, format!("message {i}"), Role::User).await;
    }

    let history = memory.get_history(&sid).await;
    let texts: Vec<String> = history.iter().map(|m| m.text.clone()).collect();
    let expected: Vec<String> = (6..=25).map(|i| format!("message {i}")).collect();
    assert_eq!(texts, expected);
}

#[tokio::test]
async fn e2e_restart_rehydrates_identical_history() {
    let tmp = tempfile::tempdir().unwrap();
    let sid = SessionId::from("restart");

    let before = {
        let orch = orchestrator(
            &test_config(),
            Arc::new(FileStore::new(tmp.path())),
            ScriptedClient::new(&["Try reopening the app."]),
        );
        orch.respond(&sid, "hi there", None).await.unwrap();
        orch.respond(&sid, "my steps are not syncing", None).await.unwrap();
        orch.history(&sid).await
    };
    assert_eq!(before.len(), 4);

    let orch = orchestrator(
        &test_config(),
        Arc::new(FileStore::new(tmp.path())),
        ScriptedClient::down(),
    );
    let after = orch.history(&sid).await;
    assert_eq!(after, before);
    assert_eq!(orch.metrics().await.memory.hydrations, 1);
}

// ── E2E: Circuit breaker ─────────────────────────────────────────────────

#[tokio::test]
async fn e2e_five_failures_open_circuit_and_sixth_call_never_reaches_endpoint() {
    let client = ScriptedClient::down();
    let breaker = Arc::new(CircuitBreaker::new("primary", &BreakerConfig::default()));
    let guarded = GuardedClient::new(client.clone(), breaker.clone());
    let request = || LlmRequest {
        model: "mock".into(),
        prompt: "hello".into(),
        system_prompt: String::new(),
        history: vec![],
        timeout: Duration::from_secs(1),
    };

    for _ in 0..5 {
        assert!(matches!(guarded.call(request()).await, Err(Error::Remote(_))));
    }
    assert_eq!(breaker.phase(), CircuitPhase::Open);
    assert_eq!(client.calls(), 5);

    // Rejection completes on the first poll: no I/O, no waiting.
    let started = std::time::Instant::now();
    let sixth = guarded
        .call(request())
        .now_or_never()
        .expect("open circuit must reject immediately");
    let elapsed = started.elapsed();

    match sixth {
        Err(Error::CircuitOpen(open)) => {
            assert_eq!(open.endpoint, "primary");
            assert!(open.retry_after > Duration::ZERO);
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(client.calls(), 5);
    assert!(elapsed < Duration::from_millis(50), "rejection took {elapsed:?}");
    assert_eq!(breaker.metrics().total_rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_circuit_recovers_after_cooldown() {
    let client = ScriptedClient::down();
    let orch = orchestrator(&test_config(), Arc::new(InMemoryStore::new()), client.clone());

    for i in 0..5 {
        orch.respond(&SessionId(format!("outage-{i}")), "what's new", None)
            .await
            .unwrap();
    }
    assert_eq!(orch.breaker().phase(), CircuitPhase::Open);

    tokio::time::advance(Duration::from_secs(61)).await;
    client
        .script
        .lock()
        .unwrap()
        .extend([Ok("back online".to_string()), Ok("still here".to_string())]);

    let probe = orch.respond(&SessionId::from("p1"), "what's new", None).await.unwrap();
    assert!(!probe.fallback_used);
    assert_eq!(orch.breaker().phase(), CircuitPhase::HalfOpen);

    orch.respond(&SessionId::from("p2"), "what's new", None).await.unwrap();
    assert_eq!(orch.breaker().phase(), CircuitPhase::Closed);
    assert_eq!(client.calls(), 7);
}

// ── E2E: Strategy and fallback ───────────────────────────────────────────

#[tokio::test]
async fn e2e_frustrated_sync_complaint_selects_llm_not_hybrid() {
    let client = ScriptedClient::new(&["Check your sync settings.", "I'm sorry, let's fix this together."]);
    let orch = orchestrator(&test_config(), Arc::new(InMemoryStore::new()), client.clone());
    let sid = SessionId::from("frustrated");

    let first = orch.respond(&sid, "my steps are not syncing", None).await.unwrap();
    assert_eq!(first.classification.intent, Intent::StepsNotSyncing);
    assert_eq!(first.decision.strategy, Strategy::Hybrid);

    let second = orch.respond(&sid, "this is so annoying!!!", None).await.unwrap();
    assert_eq!(second.classification.intent, Intent::StepsNotSyncing);
    assert_eq!(second.context.sentiment, Sentiment::Frustrated);
    assert_eq!(second.decision.strategy, Strategy::Llm);
    assert_eq!(second.text, "I'm sorry, let's fix this together.");
}

#[tokio::test]
async fn e2e_total_remote_failure_still_answers() {
    let client = ScriptedClient::down();
    let orch = orchestrator(&test_config(), Arc::new(InMemoryStore::new()), client.clone());
    let sid = SessionId::from("outage");

    for text in ["battery saver drains everything", "my count is wrong", "what's the weather"] {
        let reply = orch.respond(&sid, text, None).await.unwrap();
        assert!(reply.fallback_used, "{text}");
        assert!(!reply.text.trim().is_empty());
    }

    let greeting = orch.respond(&sid, "thanks", None).await.unwrap();
    assert_eq!(greeting.decision.strategy, Strategy::Template);
    assert!(!greeting.fallback_used);

    let metrics = orch.metrics().await;
    assert_eq!(metrics.fallbacks, 3);
    assert_eq!(metrics.requests, 4);
    assert_eq!(orch.history(&sid).await.len(), 8);
}

// ── E2E: Concurrency ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_slow_remote_call_does_not_block_other_sessions() {
    let client = ScriptedClient::new(&["fast reply", "slow reply"]);
    let orch = orchestrator(&test_config(), Arc::new(InMemoryStore::new()), client.clone());
    let slow = SessionId::from("slow");
    let fast = SessionId::from("fast");

    let slow_turn = orch.respond(&slow, "please wait while I check", None);
    let fast_turn = async {
        let reply = orch.respond(&fast, "what's new", None).await;
        // The slow session's remote call is still pending here.
        assert_eq!(orch.history(&slow).await.len(), 1);
        client.gate.notify_one();
        reply
    };
    let (slow_reply, fast_reply) = tokio::join!(slow_turn, fast_turn);

    assert_eq!(fast_reply.unwrap().text, "fast reply");
    assert_eq!(slow_reply.unwrap().text, "slow reply");
    assert_eq!(orch.history(&slow).await.len(), 2);
    assert!(orch.lock_stats().session_acquisitions > 0);
}
