use crate::types::{CandidateItem, PublishOutcome, Result};
use async_trait::async_trait;
use std::collections::HashSet;

/// Trait for pulling candidate items from a content source (subreddit
/// listing, headline API, RSS feed, trivia API, ...)
#[async_trait]
pub trait Source: Send + Sync {
    /// Unique identifier for this source; used to namespace dedup keys
    fn source_id(&self) -> String;

    /// Human-readable name for log lines
    fn source_name(&self) -> String {
        self.source_id()
    }

    /// Fetch up to `max` candidates. Errors are treated as transient by the
    /// poller: the cycle yields nothing and the next scheduled cycle retries.
    async fn fetch_candidates(&self, max: usize) -> Result<Vec<CandidateItem>>;
}

/// Trait for the outbound channel items are published to
#[async_trait]
pub trait Publisher: Send + Sync {
    fn publisher_name(&self) -> String;

    /// Publish one payload. Never returns an error: every failure is
    /// classified as transient or permanent.
    async fn publish(&self, payload: &str) -> PublishOutcome;
}

/// Storage behind the dedup store. `save` must replace the previous
/// contents atomically.
pub trait Persistence: Send + Sync {
    fn load(&self) -> Result<HashSet<String>>;

    fn save(&self, keys: &HashSet<String>) -> Result<()>;

    /// Where the state lives, for diagnostics
    fn describe(&self) -> String;
}
