use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline-wide counters, bumped by pollers and workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    discovered: AtomicU64,
    enqueued: AtomicU64,
    published: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    source_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub discovered: u64,
    pub enqueued: u64,
    pub published: u64,
    pub retried: u64,
    pub failed: u64,
    pub source_errors: u64,
}

impl PipelineStats {
    pub fn record_discovered(&self, count: u64) {
        self.discovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            discovered: self.discovered.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
        }
    }
}
