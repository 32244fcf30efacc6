use crate::dedup::DedupStore;
use crate::governor::RateGovernor;
use crate::queue::PendingQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stats::PipelineStats;
use crate::traits::Publisher;
use crate::types::{FailurePolicy, PublishOutcome, QueueEntry, RelayError};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Everything a publish worker shares with its siblings
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<PendingQueue>,
    pub dedup: Arc<DedupStore>,
    pub publisher: Arc<dyn Publisher>,
    pub governor: RateGovernor,
    pub retry: RetryPolicy,
    pub failure_policy: FailurePolicy,
    pub stats: Arc<PipelineStats>,
    /// Fires on shutdown; pending retries give up their keys
    pub cancel: CancellationToken,
    /// Tracks delayed re-enqueue tasks
    pub retries: TaskTracker,
}

/// N independent workers draining the pending queue
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    retries: TaskTracker,
}

impl WorkerPool {
    pub fn spawn(count: usize, context: WorkerContext) -> Self {
        let retries = context.retries.clone();
        let handles = (0..count.max(1))
            .map(|worker_id| {
                let context = context.clone();
                tokio::spawn(async move { run_worker(worker_id, context).await })
            })
            .collect();

        info!("Started {} publish workers", count.max(1));
        Self { handles, retries }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit (they do once the queue is closed)
    /// and for pending retry timers to resolve.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Publish worker ended abnormally: {}", e);
            }
        }
        self.retries.close();
        self.retries.wait().await;
    }
}

async fn run_worker(worker_id: usize, context: WorkerContext) {
    debug!("Worker {} waiting for entries", worker_id);
    while let Some(entry) = context.queue.pop().await {
        process_entry(worker_id, entry, &context).await;
    }
    debug!("Worker {} exiting, queue closed", worker_id);
}

/// One publish attempt for `entry`, followed by whatever its outcome calls for
pub async fn process_entry(worker_id: usize, mut entry: QueueEntry, context: &WorkerContext) {
    let slot = context.governor.acquire().await;
    let outcome = context.publisher.publish(&entry.item.payload).await;
    entry.attempt += 1;

    info!(
        worker = worker_id,
        entry_id = %entry.id,
        key = entry.key(),
        attempt = entry.attempt,
        waited_secs = (Utc::now() - entry.enqueued_at).num_seconds(),
        outcome = outcome.kind(),
        "Publish attempt finished"
    );

    match outcome {
        PublishOutcome::Success => {
            slot.success();
            context.stats.record_published();
            context.queue.settle();
        }
        PublishOutcome::Transient(detail) => {
            drop(slot);
            match context.retry.decide(entry.attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "Transient failure for {} ({}), retrying in {:?}",
                        entry.key(),
                        detail,
                        delay
                    );
                    context.stats.record_retry();
                    schedule_retry(entry, delay, context);
                }
                RetryDecision::GiveUp => {
                    let exhausted = RelayError::TransientPublish(format!(
                        "{} (gave up after {} attempts)",
                        detail, entry.attempt
                    ));
                    give_up(entry, exhausted, context).await;
                }
            }
        }
        PublishOutcome::Permanent(detail) => {
            drop(slot);
            give_up(entry, RelayError::PermanentPublish(detail), context).await;
        }
    }
}

fn schedule_retry(entry: QueueEntry, delay: std::time::Duration, context: &WorkerContext) {
    let queue = context.queue.clone();
    let dedup = context.dedup.clone();
    let cancel = context.cancel.clone();

    context.retries.spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Shutdown before retrying {}", entry.key());
                release(&dedup, &queue, entry.key()).await;
            }
            _ = tokio::time::sleep(delay) => {
                let key = entry.key().to_string();
                if let Err(e) = queue.requeue(entry).await {
                    debug!("Could not requeue {}: {}", key, e);
                    release(&dedup, &queue, &key).await;
                }
            }
        }
    });
}

/// Drop a never-published entry and hand its key back for a later run
async fn release(dedup: &DedupStore, queue: &PendingQueue, key: &str) {
    if let Err(e) = dedup.unmark(key).await {
        error!("Could not release {}: {}", key, e);
    }
    queue.settle();
}

async fn give_up(entry: QueueEntry, reason: RelayError, context: &WorkerContext) {
    error!("Giving up on {} after {} attempts: {}", entry.key(), entry.attempt, reason);
    context.stats.record_failed();

    if context.failure_policy == FailurePolicy::Unmark {
        match context.dedup.unmark(entry.key()).await {
            Ok(_) => info!("Released {} for rediscovery", entry.key()),
            Err(e) => error!("Could not release {}: {}", entry.key(), e),
        }
    }

    context.queue.settle();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Item;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedPublisher {
        outcome: PublishOutcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Publisher for ScriptedPublisher {
        fn publisher_name(&self) -> String {
            "scripted".to_string()
        }

        async fn publish(&self, _payload: &str) -> PublishOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    async fn context_with(
        outcome: PublishOutcome,
        failure_policy: FailurePolicy,
    ) -> (WorkerContext, Arc<ScriptedPublisher>) {
        let publisher = Arc::new(ScriptedPublisher {
            outcome,
            calls: AtomicUsize::new(0),
        });
        let context = WorkerContext {
            queue: Arc::new(PendingQueue::unbounded()),
            dedup: Arc::new(DedupStore::in_memory()),
            publisher: publisher.clone(),
            governor: RateGovernor::new(Duration::ZERO),
            retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            failure_policy,
            stats: Arc::new(PipelineStats::default()),
            cancel: CancellationToken::new(),
            retries: TaskTracker::new(),
        };
        (context, publisher)
    }

    async fn seed(context: &WorkerContext, key: &str) {
        context.dedup.mark(key).await.unwrap();
        context
            .queue
            .enqueue(QueueEntry::new(Item::new(key, "payload", Utc::now())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn permanent_failure_keeps_mark_by_default() {
        let (context, publisher) = context_with(
            PublishOutcome::Permanent("duplicate".into()),
            FailurePolicy::KeepMarked,
        )
        .await;
        seed(&context, "k").await;

        let entry = context.queue.pop().await.unwrap();
        process_entry(0, entry, &context).await;

        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
        assert!(context.dedup.contains("k").await);
        assert_eq!(context.queue.outstanding(), 0);
        assert_eq!(context.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn permanent_failure_can_release_the_key() {
        let (context, _) =
            context_with(PublishOutcome::Permanent("rejected".into()), FailurePolicy::Unmark).await;
        seed(&context, "k").await;

        let entry = context.queue.pop().await.unwrap();
        process_entry(0, entry, &context).await;

        assert!(!context.dedup.contains("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_requeued_after_backoff() {
        let (context, _) =
            context_with(PublishOutcome::Transient("503".into()), FailurePolicy::KeepMarked).await;
        seed(&context, "k").await;

        let entry = context.queue.pop().await.unwrap();
        process_entry(0, entry, &context).await;
        assert!(context.queue.is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let retried = context.queue.try_pop().expect("entry should be back");
        assert_eq!(retried.attempt, 1);
        assert_eq!(context.queue.outstanding(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_retry_releases_the_key() {
        let (context, _) = context_with(
            PublishOutcome::Transient("timeout".into()),
            FailurePolicy::KeepMarked,
        )
        .await;
        seed(&context, "k").await;

        let entry = context.queue.pop().await.unwrap();
        process_entry(0, entry, &context).await;

        context.cancel.cancel();
        context.retries.close();
        context.retries.wait().await;

        assert!(!context.dedup.contains("k").await);
        assert_eq!(context.queue.outstanding(), 0);
    }
}
