use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw candidate as handed over by a content source, before the relay
/// namespaces its key or decides whether it is worth publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Source-assigned identifier (canonical URL, shortlink, question text).
    pub key: String,
    /// Opaque text handed to the publisher untouched.
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl CandidateItem {
    pub fn new(
        key: impl Into<String>,
        payload: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            timestamp,
        }
    }
}

/// Result of a single publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Success,
    /// Retryable; expected to succeed on a later attempt.
    Transient(String),
    /// Not retryable.
    Permanent(String),
}

impl PublishOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            PublishOutcome::Success => "success",
            PublishOutcome::Transient(_) => "transient_failure",
            PublishOutcome::Permanent(_) => "permanent_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PublishOutcome::Success)
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Success => write!(f, "success"),
            PublishOutcome::Transient(detail) => write!(f, "transient failure: {}", detail),
            PublishOutcome::Permanent(detail) => write!(f, "permanent failure: {}", detail),
        }
    }
}

// Object style note:
// Sources and publishers are long lived and shared between tasks, so the
// relay declares them as `Send + Sync` traits taking `&self`. Anything that
// changes between calls (cursors, tokens) lives behind the implementor's
// own interior mutability.
