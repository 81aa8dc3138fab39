//! Circuit breaker: fail-fast protection around a remote endpoint.
//!
//! ```text
//!            failures in window >= threshold
//!   Closed ─────────────────────────────────▶ Open
//!     ▲                                        │ cooldown elapsed (checked lazily
//!     │ success_threshold probe successes      ▼ on the next call)
//!     └──────────────────────────────────── HalfOpen ──probe failure──▶ Open
//! ```
//!
//! One breaker exists per endpoint and is shared by every session. It is
//! constructed explicitly and injected, so tests get isolated instances.
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`; lifetime counters are atomics.
//!
//! Every transition starts a new epoch. A call's outcome only moves the
//! state machine if the call was admitted in the current epoch, so a slow
//! call from before the circuit opened cannot reopen or close it later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use stridechat_config::BreakerConfig;
use stridechat_core::CircuitOpenError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Why [`CircuitBreaker::execute`] did not return the operation's value.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The operation did not finish within the caller's timeout.
    #[error("operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The operation itself failed.
    #[error("{0}")]
    Operation(E),
}

/// Point-in-time view of a breaker, for the observability surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub endpoint: String,
    pub phase: CircuitPhase,
    /// Failures inside the current window (Closed only).
    pub failure_count: u32,
    /// Consecutive probe successes (HalfOpen only).
    pub success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
    pub last_state_change: DateTime<Utc>,
}

struct BreakerState {
    phase: CircuitPhase,
    failures: VecDeque<Instant>,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    epoch: u64,
    last_state_change: DateTime<Utc>,
}

/// What [`CircuitBreaker::admit`] granted a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Admission {
    epoch: u64,
    probe: bool,
}

impl BreakerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Failure-protection wrapper for one remote endpoint.
pub struct CircuitBreaker {
    endpoint: String,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    failure_window: Duration,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    total_rejections: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("phase", &self.phase())
            .field("failure_threshold", &self.failure_threshold)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// Releases the HalfOpen probe slot even if the probe future is dropped.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.admission.probe {
            let mut state = self.breaker.lock();
            if state.epoch == self.admission.epoch {
                state.probe_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            cooldown: config.cooldown(),
            failure_window: config.failure_window(),
            state: Mutex::new(BreakerState {
                phase: CircuitPhase::Closed,
                failures: VecDeque::new(),
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
                epoch: 0,
                last_state_change: Utc::now(),
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current phase. Does not evaluate the cooldown; that happens on the next call.
    pub fn phase(&self) -> CircuitPhase {
        self.lock().phase
    }

    /// Run `operation` under the breaker with the caller's `timeout`.
    ///
    /// When the circuit is open and cooling down, or a HalfOpen probe is
    /// already in flight, this returns [`BreakerError::Open`] immediately and
    /// `operation` is never invoked. Errors and timeouts count as failures;
    /// any completion counts as a success regardless of latency.
    pub async fn execute<T, E, F, Fut>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(open) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %self.endpoint, retry_after_ms = open.retry_after.as_millis() as u64, "Circuit rejected call");
                return Err(BreakerError::Open(open));
            }
        };
        let slot = ProbeSlot { breaker: self, admission };

        let outcome = tokio::time::timeout(timeout, operation()).await;
        let result = match outcome {
            Ok(Ok(value)) => {
                self.record_success(admission);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(admission);
                Err(BreakerError::Operation(e))
            }
            Err(_) => {
                warn!(endpoint = %self.endpoint, timeout_ms = timeout.as_millis() as u64, "Remote call timed out");
                self.record_failure(admission);
                Err(BreakerError::Timeout(timeout))
            }
        };
        drop(slot);
        result
    }

    /// Decide whether a call may proceed, and whether it is the HalfOpen probe.
    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let mut state = self.lock();
        let probe = |state: &mut BreakerState| {
            state.probe_in_flight = true;
            Admission {
                epoch: state.epoch,
                probe: true,
            }
        };
        match state.phase {
            CircuitPhase::Closed => Ok(Admission {
                epoch: state.epoch,
                probe: false,
            }),
            CircuitPhase::Open => {
                let now = Instant::now();
                let elapsed = state
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.cooldown);
                if elapsed >= self.cooldown {
                    self.transition(&mut state, CircuitPhase::HalfOpen);
                    Ok(probe(&mut *state))
                } else {
                    Err(self.open_error(self.cooldown - elapsed))
                }
            }
            CircuitPhase::HalfOpen => {
                if state.probe_in_flight {
                    Err(self.open_error(Duration::ZERO))
                } else {
                    Ok(probe(&mut *state))
                }
            }
        }
    }

    fn open_error(&self, retry_after: Duration) -> CircuitOpenError {
        let delta = chrono::Duration::from_std(retry_after).unwrap_or_else(|_| chrono::Duration::zero());
        CircuitOpenError {
            endpoint: self.endpoint.clone(),
            next_attempt_at: Utc::now() + delta,
            retry_after,
        }
    }

    /// Whether an outcome for `admission` may still move the state machine.
    fn is_current(state: &BreakerState, admission: Admission) -> bool {
        state.epoch == admission.epoch && (state.phase != CircuitPhase::HalfOpen || admission.probe)
    }

    fn record_success(&self, admission: Admission) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        if !Self::is_current(&state, admission) {
            debug!(endpoint = %self.endpoint, "Ignoring success from an earlier circuit epoch");
            return;
        }
        if state.phase == CircuitPhase::HalfOpen {
            state.consecutive_successes += 1;
            if state.consecutive_successes >= self.success_threshold {
                self.transition(&mut state, CircuitPhase::Closed);
            }
        }
    }

    fn record_failure(&self, admission: Admission) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut state = self.lock();
        if !Self::is_current(&state, admission) {
            debug!(endpoint = %self.endpoint, "Ignoring failure from an earlier circuit epoch");
            return;
        }
        match state.phase {
            CircuitPhase::Closed => {
                state.failures.push_back(now);
                state.prune(now, self.failure_window);
                if state.failures.len() >= self.failure_threshold as usize {
                    self.transition(&mut state, CircuitPhase::Open);
                }
            }
            CircuitPhase::HalfOpen => self.transition(&mut state, CircuitPhase::Open),
            CircuitPhase::Open => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitPhase) {
        let from = state.phase;
        state.phase = to;
        state.epoch += 1;
        state.last_state_change = Utc::now();
        state.consecutive_successes = 0;
        match to {
            CircuitPhase::Open => {
                state.opened_at = Some(Instant::now());
                state.failures.clear();
                warn!(endpoint = %self.endpoint, from = %from, cooldown_ms = self.cooldown.as_millis() as u64, "Circuit opened");
            }
            CircuitPhase::HalfOpen => {
                info!(endpoint = %self.endpoint, "Circuit half-open, admitting probe");
            }
            CircuitPhase::Closed => {
                state.opened_at = None;
                state.failures.clear();
                info!(endpoint = %self.endpoint, from = %from, "Circuit closed");
            }
        }
    }

    /// Force the breaker closed, discarding failure history.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.probe_in_flight = false;
        self.transition(&mut state, CircuitPhase::Closed);
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(now, self.failure_window);
        BreakerMetrics {
            endpoint: self.endpoint.clone(),
            phase: state.phase,
            failure_count: state.failures.len() as u32,
            success_count: state.consecutive_successes,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            last_state_change: state.last_state_change,
        }
    }
}
