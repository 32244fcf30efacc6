use crate::config::{PublisherConfig, RelayConfig};
use crate::dedup::DedupStore;
use crate::filter::ItemFilter;
use crate::governor::RateGovernor;
use crate::poller::{PollerConfig, SourcePoller};
use crate::publishers::build_publisher;
use crate::queue::PendingQueue;
use crate::scheduler::Scheduler;
use crate::sources::build_source;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::traits::{Publisher, Source};
use crate::types::Result;
use crate::worker::{WorkerContext, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// A source together with how often and how deep to poll it
struct SourceEntry {
    source: Box<dyn Source>,
    poll_interval: Duration,
    max_candidates: usize,
}

/// Wires sources, dedup store, filter, queue, workers and scheduler
/// together. Built once, then either started for continuous operation or
/// run for a single pass.
pub struct RelayPipeline {
    config: RelayConfig,
    dedup: Arc<DedupStore>,
    queue: Arc<PendingQueue>,
    governor: RateGovernor,
    stats: Arc<PipelineStats>,
    publisher: Arc<dyn Publisher>,
    pollers: Vec<(Duration, Arc<SourcePoller>)>,
}

impl RelayPipeline {
    /// Build everything the configuration describes: dedup file, sources
    /// and publisher.
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = PipelineBuilder::new(config.clone());
        for source_config in &config.sources {
            let source = build_source(source_config, &config)?;
            builder = builder.add_source(
                source,
                source_config.poll_interval,
                source_config.max_candidates,
            );
        }
        builder.build()
    }

    pub fn dedup(&self) -> Arc<DedupStore> {
        self.dedup.clone()
    }

    pub fn queue(&self) -> Arc<PendingQueue> {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn source_count(&self) -> usize {
        self.pollers.len()
    }

    fn spawn_workers(&self, cancel: &CancellationToken) -> WorkerPool {
        let context = WorkerContext {
            queue: self.queue.clone(),
            dedup: self.dedup.clone(),
            publisher: self.publisher.clone(),
            governor: self.governor.clone(),
            retry: self.config.retry_policy(),
            failure_policy: self.config.failure_policy,
            stats: self.stats.clone(),
            cancel: cancel.clone(),
            retries: TaskTracker::new(),
        };
        WorkerPool::spawn(self.config.workers, context)
    }

    /// Start pollers on the scheduler and the publish worker pool. Runs
    /// until `shutdown` is called on the returned handle.
    pub fn start(self) -> RunningRelay {
        info!(
            "Starting relay: {} sources, {} workers, publisher {}",
            self.pollers.len(),
            self.config.workers,
            self.publisher.publisher_name()
        );

        let cancel = CancellationToken::new();
        let workers = self.spawn_workers(&cancel);

        let mut scheduler = Scheduler::new(self.config.tick);
        for (interval, poller) in &self.pollers {
            scheduler.register(*interval, poller.clone());
        }
        let scheduler_cancel = cancel.clone();
        let scheduler = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

        RunningRelay {
            cancel,
            scheduler: Some(scheduler),
            workers,
            dedup: self.dedup,
            queue: self.queue,
            stats: self.stats,
        }
    }

    /// Poll every source once, publish everything that was queued (retries
    /// included), then shut down.
    pub async fn run_once(self) -> Result<StatsSnapshot> {
        info!("Running a single relay pass over {} sources", self.pollers.len());

        let cancel = CancellationToken::new();
        let workers = self.spawn_workers(&cancel);

        for (_, poller) in &self.pollers {
            let emitted = poller.poll().await;
            info!("{} queued {} items", poller.source_id(), emitted.len());
        }

        self.queue.wait_idle().await;

        let running = RunningRelay {
            cancel,
            scheduler: None,
            workers,
            dedup: self.dedup,
            queue: self.queue,
            stats: self.stats,
        };
        running.shutdown().await
    }
}

/// Handle to a started pipeline
pub struct RunningRelay {
    cancel: CancellationToken,
    scheduler: Option<JoinHandle<()>>,
    workers: WorkerPool,
    dedup: Arc<DedupStore>,
    queue: Arc<PendingQueue>,
    stats: Arc<PipelineStats>,
}

impl RunningRelay {
    pub fn dedup(&self) -> Arc<DedupStore> {
        self.dedup.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Token that stops the pipeline when cancelled; `shutdown` still has
    /// to be awaited to drain it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling, let in-flight publishes finish, hand back the keys of
    /// entries that were never attempted and flush the dedup store.
    pub async fn shutdown(mut self) -> Result<StatsSnapshot> {
        info!("Shutting down relay");
        self.cancel.cancel();

        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.await {
                error!("Scheduler ended abnormally: {}", e);
            }
        }

        let abandoned = self.queue.close().await;
        if !abandoned.is_empty() {
            warn!("Releasing {} queued items that were never published", abandoned.len());
        }
        for entry in &abandoned {
            if let Err(e) = self.dedup.unmark(entry.key()).await {
                error!("Could not release {}: {}", entry.key(), e);
            }
        }

        self.workers.join().await;
        self.dedup.flush().await?;

        let snapshot = self.stats.snapshot();
        info!(
            discovered = snapshot.discovered,
            enqueued = snapshot.enqueued,
            published = snapshot.published,
            retried = snapshot.retried,
            failed = snapshot.failed,
            source_errors = snapshot.source_errors,
            "Relay stopped"
        );
        Ok(snapshot)
    }
}

/// Pipeline builder for easier configuration
pub struct PipelineBuilder {
    config: RelayConfig,
    dedup: Option<DedupStore>,
    publisher: Option<Arc<dyn Publisher>>,
    sources: Vec<SourceEntry>,
}

impl PipelineBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            dedup: None,
            publisher: None,
            sources: Vec::new(),
        }
    }

    /// Use this store instead of opening `config.dedup_path`
    pub fn dedup(mut self, dedup: DedupStore) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Use this publisher instead of the configured one
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn add_source(
        mut self,
        source: Box<dyn Source>,
        poll_interval: Duration,
        max_candidates: usize,
    ) -> Self {
        info!("Adding source to pipeline: {}", source.source_name());
        self.sources.push(SourceEntry {
            source,
            poll_interval,
            max_candidates,
        });
        self
    }

    pub fn build(self) -> Result<RelayPipeline> {
        let config = self.config;

        let publisher = match self.publisher {
            Some(publisher) => publisher,
            None => build_publisher(&config)?,
        };

        let dedup = match self.dedup {
            Some(dedup) => dedup,
            None if config.publisher == PublisherConfig::DryRun => {
                warn!(
                    "Dry run: reading {} but keeping new keys in memory",
                    config.dedup_path.display()
                );
                DedupStore::open_file_read_only(config.dedup_path.clone())?
            }
            None => DedupStore::open_file(config.dedup_path.clone())?,
        };
        let dedup = Arc::new(dedup);

        let filter = Arc::new(ItemFilter::new(
            config.recency_horizon_chrono(),
            config.blocked_terms.clone(),
        ));
        let queue = Arc::new(PendingQueue::new(config.queue_capacity));
        let stats = Arc::new(PipelineStats::default());

        let pollers = self
            .sources
            .into_iter()
            .map(|entry| {
                let poller = SourcePoller::new(
                    entry.source,
                    dedup.clone(),
                    filter.clone(),
                    queue.clone(),
                    stats.clone(),
                    PollerConfig {
                        max_candidates: entry.max_candidates,
                        namespace_keys: config.namespace_keys,
                    },
                );
                (entry.poll_interval, Arc::new(poller))
            })
            .collect();

        Ok(RelayPipeline {
            governor: RateGovernor::new(config.min_publish_interval),
            config,
            dedup,
            queue,
            stats,
            publisher,
            pollers,
        })
    }
}
