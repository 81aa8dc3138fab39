//! Conversation memory manager: per-session, bounded, concurrency-safe history.
//!
//! Locking has two levels:
//!
//! - a short `std::sync::Mutex` over the session registry, held only to look
//!   up or create a session slot (never across an `.await`);
//! - one `tokio::sync::Mutex` per session, which serializes every read and
//!   write of that session in arrival order (tokio's mutex is fair).
//!
//! Sessions hydrate lazily from the [`MessageStore`] the first time they are
//! touched, exactly once per slot. Persistence failures never fail an append:
//! the message stays in memory, a warning is logged and a counter is bumped.
//!
//! Background saves are tracked on their slot. Clearing a session waits for
//! them and deletes from the store while still holding the session lock, so
//! nothing written before the clear can resurface afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use stridechat_config::{MemoryConfig, PersistenceMode};
use stridechat_core::error::PersistenceError;
use stridechat_core::{Message, MessageStore, Role, Session, SessionId, TokenEstimator};
use tokio::sync::{Mutex as SessionLock, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Aggregate counts computed at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub store: String,
    pub total_sessions: usize,
    pub total_messages: usize,
    pub max_messages: usize,
    pub hydrations: u64,
    pub persistence_failures: u64,
}

/// Capacity usage for one resident session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUsage {
    pub session_id: SessionId,
    pub message_count: usize,
    pub max_messages: usize,
    /// `message_count / max_messages`, as a percentage.
    pub capacity_pct: f64,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Lock accounting for the observability surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LockStats {
    pub registry_acquisitions: u64,
    pub session_acquisitions: u64,
    /// Session acquisitions that had to wait behind another holder.
    pub contended_acquisitions: u64,
    pub active_sessions: usize,
}

struct SessionSlot {
    session: Session,
    hydrated: bool,
    // Set when the slot leaves the registry; a task that raced it retries on a fresh slot.
    evicted: bool,
    // Fire-and-forget saves not yet known to be finished.
    pending: Vec<JoinHandle<()>>,
}

impl SessionSlot {
    fn new(session_id: &SessionId) -> Self {
        Self {
            session: Session::new(session_id.clone()),
            hydrated: false,
            evicted: false,
            pending: Vec::new(),
        }
    }

    fn has_pending_saves(&self) -> bool {
        self.pending.iter().any(|handle| !handle.is_finished())
    }

    async fn drain_pending(&mut self, session_id: &SessionId) {
        for handle in self.pending.drain(..) {
            if let Err(e) = handle.await {
                warn!(session_id = %session_id, error = %e, "Background save task did not complete");
            }
        }
    }
}

type Registry = HashMap<SessionId, Arc<SessionLock<SessionSlot>>>;

/// Owns every resident session and mediates access to the store.
pub struct MemoryManager {
    max_messages: usize,
    persistence: PersistenceMode,
    sort_on_hydrate: bool,
    idle_ttl: Duration,
    store: Arc<dyn MessageStore>,
    estimator: Option<Arc<dyn TokenEstimator>>,
    sessions: Mutex<Registry>,
    registry_acquisitions: AtomicU64,
    session_acquisitions: AtomicU64,
    contended_acquisitions: AtomicU64,
    hydrations: AtomicU64,
    persistence_failures: Arc<AtomicU64>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("store", &self.store.name())
            .field("max_messages", &self.max_messages)
            .field("persistence", &self.persistence)
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}

impl MemoryManager {
    pub fn new(config: &MemoryConfig, store: Arc<dyn MessageStore>) -> Self {
        Self {
            max_messages: config.max_messages.max(1),
            persistence: config.persistence,
            sort_on_hydrate: config.sort_on_hydrate,
            idle_ttl: config.idle_ttl(),
            store,
            estimator: None,
            sessions: Mutex::new(HashMap::new()),
            registry_acquisitions: AtomicU64::new(0),
            session_acquisitions: AtomicU64::new(0),
            contended_acquisitions: AtomicU64::new(0),
            hydrations: AtomicU64::new(0),
            persistence_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stamp appended messages with this estimator instead of `chars / 4`.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Configured idle time after which [`evict_idle`](Self::evict_idle) may drop a session.
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, session_id: &SessionId) -> Arc<SessionLock<SessionSlot>> {
        let mut sessions = self.registry();
        Arc::clone(
            sessions
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(SessionLock::new(SessionSlot::new(session_id)))),
        )
    }

    /// Take `slot` out of the registry unless it was already replaced.
    fn retire(&self, session_id: &SessionId, slot: &Arc<SessionLock<SessionSlot>>, guard: &mut SessionSlot) {
        guard.evicted = true;
        let mut sessions = self.registry();
        if sessions.get(session_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            sessions.remove(session_id);
        }
    }

    async fn acquire(&self, slot: &Arc<SessionLock<SessionSlot>>) -> OwnedMutexGuard<SessionSlot> {
        self.session_acquisitions.fetch_add(1, Ordering::Relaxed);
        match Arc::clone(slot).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.contended_acquisitions.fetch_add(1, Ordering::Relaxed);
                Arc::clone(slot).lock_owned().await
            }
        }
    }

    /// Acquire a session's lock, hydrating it on first use.
    async fn lock_session(
        &self,
        session_id: &SessionId,
    ) -> (Arc<SessionLock<SessionSlot>>, OwnedMutexGuard<SessionSlot>) {
        loop {
            let slot = self.slot(session_id);
            let mut guard = self.acquire(&slot).await;
            if guard.evicted {
                continue;
            }
            if !guard.hydrated {
                self.hydrate(session_id, &mut guard).await;
            }
            return (slot, guard);
        }
    }

    async fn hydrate(&self, session_id: &SessionId, slot: &mut SessionSlot) {
        slot.hydrated = true;
        self.hydrations.fetch_add(1, Ordering::Relaxed);
        let mut loaded = match self.store.load_messages(session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                self.record_failure(session_id, &e);
                return;
            }
        };
        if loaded.is_empty() {
            return;
        }
        if self.sort_on_hydrate {
            loaded.sort_by_key(|m| m.timestamp);
        }
        let count = loaded.len();
        slot.session.messages = loaded;
        let dropped = slot.session.truncate_oldest(self.max_messages);
        if let Some(first) = slot.session.messages.first() {
            slot.session.created_at = first.timestamp;
        }
        if let Some(last) = slot.session.messages.last() {
            slot.session.last_activity = last.timestamp;
        }
        debug!(session_id = %session_id, count, dropped, store = self.store.name(), "Session hydrated");
    }

    fn record_failure(&self, session_id: &SessionId, error: &PersistenceError) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
        warn!(session_id = %session_id, store = self.store.name(), error = %error, "Persistence failed; keeping message in memory");
    }

    fn estimate(&self, text: &str) -> usize {
        match &self.estimator {
            Some(estimator) => estimator.estimate(text),
            None => text.chars().count().div_ceil(4),
        }
    }

    /// Append an already-sanitized message and persist it.
    ///
    /// Never fails: a persistence error is logged and counted, and the
    /// message remains in memory.
    pub async fn add_message(&self, session_id: &SessionId, text: impl Into<String>, role: Role) -> Message {
        let text = text.into();
        let token_count = self.estimate(&text);
        let (_, mut slot) = self.lock_session(session_id).await;

        let mut message = Message::new(session_id.clone(), role, text, token_count);
        // Keep timestamps non-decreasing so a sorted reload preserves append order.
        if let Some(last) = slot.session.messages.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        let evicted = slot.session.push_bounded(message.clone(), self.max_messages);
        if evicted > 0 {
            debug!(session_id = %session_id, evicted, "Evicted oldest messages");
        }

        match self.persistence {
            PersistenceMode::Sync => {
                // Written under the session lock so the store sees append order.
                if let Err(e) = self.store.save_message(session_id, &message).await {
                    self.record_failure(session_id, &e);
                }
            }
            PersistenceMode::FireAndForget => {
                let store = Arc::clone(&self.store);
                let failures = Arc::clone(&self.persistence_failures);
                let session_id = session_id.clone();
                let pending = message.clone();
                slot.pending.retain(|handle| !handle.is_finished());
                slot.pending.push(tokio::spawn(async move {
                    if let Err(e) = store.save_message(&session_id, &pending).await {
                        failures.fetch_add(1, Ordering::Relaxed);
                        warn!(session_id = %session_id, store = store.name(), error = %e, "Background persistence failed");
                    }
                }));
            }
        }
        message
    }

    /// Ordered copy of a session's retained history.
    ///
    /// A session with no history is not kept resident after the read.
    pub async fn get_history(&self, session_id: &SessionId) -> Vec<Message> {
        let (slot, mut guard) = self.lock_session(session_id).await;
        if guard.session.messages.is_empty() {
            self.retire(session_id, &slot, &mut guard);
            return Vec::new();
        }
        guard.session.last_activity = Utc::now();
        guard.session.messages.clone()
    }

    /// Drop a session from memory and delete it from the store.
    ///
    /// Pending background saves finish first, and the delete runs under the
    /// session lock, so concurrent readers see either the old history or an
    /// empty one. Returns whether anything existed. The in-memory copy is
    /// removed even when the store delete fails.
    pub async fn clear_session(&self, session_id: &SessionId) -> Result<bool, PersistenceError> {
        loop {
            let resident = self.registry().get(session_id).cloned();
            let Some(slot) = resident else {
                let in_store = self.store.delete_session(session_id).await?;
                info!(session_id = %session_id, in_memory = false, in_store, "Session cleared");
                return Ok(in_store);
            };
            let mut guard = self.acquire(&slot).await;
            if guard.evicted {
                continue;
            }
            guard.drain_pending(session_id).await;
            let deleted = self.store.delete_session(session_id).await;
            let in_memory = !guard.session.messages.is_empty();
            guard.session.messages.clear();
            self.retire(session_id, &slot, &mut guard);
            drop(guard);

            let in_store = deleted?;
            info!(session_id = %session_id, in_memory, in_store, "Session cleared");
            return Ok(in_memory || in_store);
        }
    }

    /// Remove sessions idle for at least `ttl` from memory. Sessions in use or
    /// with saves still in flight are skipped. Their history stays in the
    /// store and rehydrates on next use.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut sessions = self.registry();
        let before = sessions.len();
        sessions.retain(|_, slot| match slot.try_lock() {
            Ok(mut guard) => {
                let idle = now.signed_duration_since(guard.session.last_activity) >= ttl
                    && !guard.has_pending_saves();
                if idle {
                    guard.evicted = true;
                }
                !idle
            }
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    fn resident(&self) -> Vec<Arc<SessionLock<SessionSlot>>> {
        self.registry().values().cloned().collect()
    }

    pub async fn get_stats(&self) -> MemoryStats {
        let slots = self.resident();
        let mut total_messages = 0;
        for slot in &slots {
            total_messages += slot.lock().await.session.messages.len();
        }
        MemoryStats {
            store: self.store.name().to_string(),
            total_sessions: slots.len(),
            total_messages,
            max_messages: self.max_messages,
            hydrations: self.hydrations.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures(),
        }
    }

    /// Usage of a resident session; `None` if it is not loaded.
    pub async fn get_session_usage(&self, session_id: &SessionId) -> Option<SessionUsage> {
        let slot = self.registry().get(session_id).cloned()?;
        let guard = slot.lock().await;
        if guard.evicted {
            return None;
        }
        let session = &guard.session;
        let message_count = session.messages.len();
        Some(SessionUsage {
            session_id: session_id.clone(),
            message_count,
            max_messages: self.max_messages,
            capacity_pct: message_count as f64 * 100.0 / self.max_messages as f64,
            token_count: session.messages.iter().map(|m| m.token_count).sum(),
            created_at: session.created_at,
            last_activity: session.last_activity,
        })
    }

    pub fn get_lock_stats(&self) -> LockStats {
        LockStats {
            registry_acquisitions: self.registry_acquisitions.load(Ordering::Relaxed),
            session_acquisitions: self.session_acquisitions.load(Ordering::Relaxed),
            contended_acquisitions: self.contended_acquisitions.load(Ordering::Relaxed),
            active_sessions: self.active_sessions(),
        }
    }
}
