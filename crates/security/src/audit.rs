//! Audit logging: structured privacy and availability events.
//!
//! Every redaction, blocked transmission, fallback and circuit transition is
//! recorded here. Entries never carry user text: only categories, counts,
//! lengths and endpoint names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Entries kept in memory before the oldest are dropped.
pub const DEFAULT_RETENTION: usize = 1_000;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Session the event belongs to, or `"system"`.
    pub session: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Sensitive entities were replaced by placeholders
    PhiRedacted { categories: Vec<String>, count: usize },
    /// Text was refused because residual PHI survived redaction
    TransmissionBlocked { text_len: usize },
    /// The remote path failed and a template answered instead
    RemoteFallback { reason: String },
    /// A circuit breaker tripped open
    CircuitOpened { endpoint: String },
    /// A circuit breaker recovered
    CircuitClosed { endpoint: String },
    /// An operator forced a breaker closed
    ManualReset { endpoint: String },
    /// A session's history was deleted
    SessionCleared { removed_from_store: bool },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Bounded in-memory audit log that also forwards to sinks.
pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    retention: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("retention", &self.retention)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retention: DEFAULT_RETENTION,
            sinks,
        }
    }

    /// Keep at most `retention` entries in memory (minimum 1).
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    // A panicking sink must not disable auditing for everyone else.
    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an audit event.
    pub fn log(&self, event: AuditEvent, session: &str, outcome: AuditOutcome, details: Option<String>) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            session: session.into(),
            outcome,
            details,
        };

        {
            let mut entries = self.lock();
            while entries.len() >= self.retention {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Get all retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Get entries recorded for one session.
    pub fn entries_for_session(&self, session: &str) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| e.session == session)
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            session = %entry.session,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}
