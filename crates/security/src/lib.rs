//! Privacy layer for StrideChat: PHI redaction and audit logging.
//!
//! Provides:
//! - **Sanitizer**: ordered, case-insensitive redaction of numbers, timeframes,
//!   app names and device models, with a strict (fail-closed) or permissive policy
//! - **Audit logging**: structured privacy and availability events

pub mod audit;
pub mod sanitizer;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use sanitizer::{
    PhiCategory, PhiSanitizer, Replacement, SanitizationResult, SanitizerError,
};
