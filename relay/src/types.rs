use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;
// Collaborator-facing types live in the interfaces crate
pub use interfaces::defs::{CandidateItem, PublishOutcome};

/// A discovered unit of content that the relay has taken responsibility for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    key: String,
    pub payload: String,
    pub discovered_at: DateTime<Utc>,
}

impl Item {
    pub fn new(
        key: impl Into<String>,
        payload: impl Into<String>,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            discovered_at,
        }
    }

    /// Builds an item from a source candidate, optionally prefixing the key
    /// with the source id so two sources can never collide.
    pub fn from_candidate(source_id: &str, candidate: CandidateItem, namespace_keys: bool) -> Self {
        let key = if namespace_keys {
            format!("{}:{}", source_id, candidate.key)
        } else {
            candidate.key
        };

        Self {
            key,
            payload: candidate.payload,
            discovered_at: candidate.timestamp,
        }
    }

    /// The dedup key. Immutable once the item exists.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// An item waiting in (or just taken from) the pending queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub item: Item,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(item: Item) -> Self {
        Self {
            id: Uuid::new_v4(),
            item,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &str {
        self.item.key()
    }
}

/// What to do with a key once its publish attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Never retry the key again, even if a source offers it later.
    KeepMarked,
    /// Remove the key from the dedup store so a later poll may rediscover it.
    Unmark,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::KeepMarked
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep_marked" => Ok(FailurePolicy::KeepMarked),
            "unmark" | "retry_later" => Ok(FailurePolicy::Unmark),
            other => Err(RelayError::Configuration(format!(
                "unknown failure policy '{}' (expected 'keep' or 'unmark')",
                other
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Source {source_id} failed: {message}")]
    Source { source_id: String, message: String },

    #[error("Transient publish error: {0}")]
    TransientPublish(String),

    #[error("Permanent publish error: {0}")]
    PermanentPublish(String),

    #[error("Dedup state at {} is corrupt: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pending queue is closed")]
    QueueClosed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    pub fn source_failure(source_id: impl Into<String>, message: impl ToString) -> Self {
        RelayError::Source {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    /// Errors that must stop the process before any publishing happens.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::CorruptState { .. } | RelayError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
