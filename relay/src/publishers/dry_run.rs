use crate::traits::Publisher;
use crate::types::PublishOutcome;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Logs every payload instead of sending it; always succeeds.
#[derive(Default)]
pub struct DryRunPublisher {
    published: AtomicU64,
}

impl DryRunPublisher {
    /// How many payloads have been "published" so far
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    fn publisher_name(&self) -> String {
        "dry-run".to_string()
    }

    async fn publish(&self, payload: &str) -> PublishOutcome {
        let n = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[dry-run #{}] would publish: {}", n, payload);
        PublishOutcome::Success
    }
}
