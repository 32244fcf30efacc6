use crate::dedup::DedupStore;
use crate::filter::ItemFilter;
use crate::queue::PendingQueue;
use crate::scheduler::PeriodicTask;
use crate::stats::PipelineStats;
use crate::traits::Source;
use crate::types::{Item, QueueEntry, RelayError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-poller settings
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub max_candidates: usize,
    pub namespace_keys: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            namespace_keys: true,
        }
    }
}

/// Queries one source and moves its unseen, acceptable items into the
/// pending queue.
pub struct SourcePoller {
    source: Box<dyn Source>,
    dedup: Arc<DedupStore>,
    filter: Arc<ItemFilter>,
    queue: Arc<PendingQueue>,
    stats: Arc<PipelineStats>,
    config: PollerConfig,
}

impl SourcePoller {
    pub fn new(
        source: Box<dyn Source>,
        dedup: Arc<DedupStore>,
        filter: Arc<ItemFilter>,
        queue: Arc<PendingQueue>,
        stats: Arc<PipelineStats>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            dedup,
            filter,
            queue,
            stats,
            config,
        }
    }

    pub fn source_id(&self) -> String {
        self.source.source_id()
    }

    /// Run one poll cycle and return the items that were enqueued.
    ///
    /// Keys are marked before the entry is enqueued, so a key rediscovered
    /// by an overlapping cycle (or twice in the same batch) is dropped here
    /// rather than published twice.
    pub async fn poll(&self) -> Vec<Item> {
        let source_id = self.source.source_id();

        let candidates = match self.source.fetch_candidates(self.config.max_candidates).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Poll of {} failed, skipping this cycle: {}", self.source.source_name(), e);
                self.stats.record_source_error();
                return Vec::new();
            }
        };

        debug!("Source {} returned {} candidates", source_id, candidates.len());
        self.stats.record_discovered(candidates.len() as u64);

        let mut emitted = Vec::new();
        for candidate in candidates.into_iter().take(self.config.max_candidates) {
            let item = Item::from_candidate(&source_id, candidate, self.config.namespace_keys);

            if self.dedup.contains(item.key()).await {
                debug!("Skipping already handled {}", item.key());
                continue;
            }
            if !self.filter.accept(&item) {
                continue;
            }

            match self.dedup.mark(item.key()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Lost claim race for {}", item.key());
                    continue;
                }
                Err(e) => {
                    error!("Could not record {} as handled, ending cycle: {}", item.key(), e);
                    break;
                }
            }

            match self.queue.enqueue(QueueEntry::new(item.clone())).await {
                Ok(()) => {
                    info!("New item from {}: {}", source_id, item.key());
                    self.stats.record_enqueued();
                    emitted.push(item);
                }
                Err(RelayError::QueueClosed) => {
                    // Shutting down: release the claim so the next run sees it again
                    if let Err(e) = self.dedup.unmark(item.key()).await {
                        error!("Could not release {} during shutdown: {}", item.key(), e);
                    }
                    break;
                }
                Err(e) => {
                    error!("Could not enqueue {}: {}", item.key(), e);
                    break;
                }
            }
        }

        emitted
    }
}

#[async_trait]
impl PeriodicTask for SourcePoller {
    fn task_name(&self) -> String {
        format!("poll:{}", self.source.source_id())
    }

    async fn run(&self) {
        let emitted = self.poll().await;
        if !emitted.is_empty() {
            info!("Poll of {} queued {} new items", self.source.source_name(), emitted.len());
        }
    }
}
