//! Message and Session domain types.
//!
//! These are the value objects that flow through the pipeline:
//! user text → sanitizer → session memory → (optionally) remote LLM → session memory.
//!
//! A [`Message`] only ever holds sanitized text. Raw user input lives no
//! longer than the sanitizer call that consumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant (template or LLM generated)
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single, immutable message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Owning session
    pub session_id: SessionId,

    /// Who sent this message
    pub role: Role,

    /// Sanitized text content
    pub text: String,

    /// Creation time; messages are ordered by it
    pub timestamp: DateTime<Utc>,

    /// Estimated token cost of `text`
    #[serde(default)]
    pub token_count: usize,
}

impl Message {
    /// Create a new message stamped with the current time.
    pub fn new(
        session_id: SessionId,
        role: Role,
        text: impl Into<String>,
        token_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            role,
            text: text.into(),
            timestamp: Utc::now(),
            token_count,
        }
    }

    /// Create a user message.
    pub fn user(session_id: SessionId, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, text, 0)
    }

    /// Create an assistant message.
    pub fn assistant(session_id: SessionId, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant, text, 0)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// A bounded, ordered conversation history for one interaction stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,

    /// Ordered messages, oldest first
    pub messages: Vec<Message>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added or read
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session.
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a message, then evict the oldest ones beyond `max_messages`.
    ///
    /// Returns how many messages were evicted.
    pub fn push_bounded(&mut self, message: Message, max_messages: usize) -> usize {
        self.last_activity = Utc::now();
        self.messages.push(message);
        self.truncate_oldest(max_messages)
    }

    /// Drop oldest messages until at most `max_messages` remain.
    pub fn truncate_oldest(&mut self, max_messages: usize) -> usize {
        let excess = self.messages.len().saturating_sub(max_messages);
        if excess > 0 {
            self.messages.drain(..excess);
        }
        excess
    }

    /// Number of user turns in the retained history.
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_user()).count()
    }
}
