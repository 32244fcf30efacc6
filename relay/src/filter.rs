use crate::types::Item;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

const DEFAULT_RECENCY_HOURS: i64 = 24;

/// Drops candidates that are too old or that mention a blocked term.
///
/// Both predicates are pure functions of the item and the static
/// configuration; the recency check is evaluated against the time the
/// filter runs.
#[derive(Debug, Clone)]
pub struct ItemFilter {
    recency_horizon: Duration,
    // Stored lowercased
    blocked_terms: Vec<String>,
}

impl ItemFilter {
    pub fn new(recency_horizon: Duration, blocked_terms: Vec<String>) -> Self {
        let blocked_terms = blocked_terms
            .into_iter()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();

        Self {
            recency_horizon,
            blocked_terms,
        }
    }

    pub fn with_blocked_terms(mut self, terms: &[&str]) -> Self {
        self.blocked_terms = terms
            .iter()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        self
    }

    pub fn recency_horizon(&self) -> Duration {
        self.recency_horizon
    }

    pub fn accept(&self, item: &Item) -> bool {
        self.accept_at(item, Utc::now())
    }

    pub fn accept_at(&self, item: &Item, now: DateTime<Utc>) -> bool {
        if !self.is_recent(item, now) {
            debug!("Rejecting {}: older than {}h", item.key(), self.recency_horizon.num_hours());
            return false;
        }

        if let Some(term) = self.blocked_term_in(&item.payload) {
            debug!("Rejecting {}: contains blocked term '{}'", item.key(), term);
            return false;
        }

        true
    }

    /// An item exactly on the horizon has not expired yet.
    pub fn is_recent(&self, item: &Item, now: DateTime<Utc>) -> bool {
        item.discovered_at >= now - self.recency_horizon
    }

    /// Plain case-insensitive substring match, deliberately not aware of
    /// word boundaries.
    pub fn blocked_term_in(&self, payload: &str) -> Option<&str> {
        if self.blocked_terms.is_empty() {
            return None;
        }

        let haystack = payload.to_lowercase();
        self.blocked_terms
            .iter()
            .find(|term| haystack.contains(term.as_str()))
            .map(|term| term.as_str())
    }
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_RECENCY_HOURS), Vec::new())
    }
}
