use crate::types::{QueueEntry, RelayError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;

type Sender = mpsc::UnboundedSender<QueueEntry>;

/// FIFO handoff between pollers and publish workers, built on an mpsc
/// channel shared by the whole worker pool.
///
/// Besides the entries themselves the queue tracks how many items are
/// outstanding: accepted by `enqueue` and not yet settled by a worker.
/// Entries out for a retry delay still count, which is what lets
/// `wait_idle` tell "nothing queued" apart from "nothing left to do".
pub struct PendingQueue {
    sender: Mutex<Option<Sender>>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<QueueEntry>>,
    /// Free slots when bounded
    slots: Option<Semaphore>,
    capacity: Option<usize>,
    queued: AtomicUsize,
    outstanding: watch::Sender<usize>,
    closed: CancellationToken,
}

impl PendingQueue {
    /// `capacity == 0` means unbounded
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);
        let capacity = if capacity == 0 { None } else { Some(capacity) };

        Self {
            sender: Mutex::new(Some(sender)),
            receiver: AsyncMutex::new(receiver),
            slots: capacity.map(Semaphore::new),
            capacity,
            queued: AtomicUsize::new(0),
            outstanding,
            closed: CancellationToken::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    fn sender(&self) -> MutexGuard<'_, Option<Sender>> {
        // Nothing panics while holding this lock, so a poisoned guard is
        // still consistent
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a newly discovered item. Waits for room when the queue is bounded.
    pub async fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        self.push(entry, true).await
    }

    /// Put back an entry that is already outstanding (retry after a
    /// transient failure).
    pub async fn requeue(&self, entry: QueueEntry) -> Result<()> {
        self.push(entry, false).await
    }

    async fn push(&self, entry: QueueEntry, fresh: bool) -> Result<()> {
        if let Some(slots) = &self.slots {
            // Acquire fails once the semaphore is closed by `close`
            slots.acquire().await.map_err(|_| RelayError::QueueClosed)?.forget();
        }

        if fresh {
            self.outstanding.send_modify(|n| *n += 1);
        }
        self.queued.fetch_add(1, Ordering::SeqCst);

        let sent = match self.sender().as_ref() {
            Some(sender) => sender.send(entry).is_ok(),
            None => false,
        };
        if sent {
            return Ok(());
        }

        self.queued.fetch_sub(1, Ordering::SeqCst);
        if fresh {
            self.settle();
        }
        Err(RelayError::QueueClosed)
    }

    fn taken(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        if let Some(slots) = &self.slots {
            slots.add_permits(1);
        }
    }

    /// Take the oldest entry, waiting while the queue is empty. Returns
    /// `None` once the queue is closed.
    pub async fn pop(&self) -> Option<QueueEntry> {
        let mut receiver = self.receiver.lock().await;
        let entry = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            entry = receiver.recv() => entry,
        }?;
        self.taken();
        Some(entry)
    }

    /// Non-blocking variant of `pop`
    pub fn try_pop(&self) -> Option<QueueEntry> {
        if self.closed.is_cancelled() {
            return None;
        }
        let mut receiver = self.receiver.try_lock().ok()?;
        let entry = receiver.try_recv().ok()?;
        self.taken();
        Some(entry)
    }

    /// Mark one outstanding item as finished (published, given up on, or
    /// abandoned during shutdown).
    pub fn settle(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Wait until every enqueued item has been settled
    pub async fn wait_idle(&self) {
        let mut outstanding = self.outstanding.subscribe();
        // The sender lives in `self`, so this only ends by matching
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting entries and wake every waiter. Entries that were
    /// never handed to a worker are returned (and no longer outstanding) so
    /// the caller can release their keys.
    pub async fn close(&self) -> Vec<QueueEntry> {
        self.closed.cancel();
        if let Some(slots) = &self.slots {
            slots.close();
        }
        drop(self.sender().take());

        // Poppers see the cancellation and let go of the receiver
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut drained = Vec::new();
        while let Ok(entry) = receiver.try_recv() {
            drained.push(entry);
        }

        self.queued.fetch_sub(drained.len(), Ordering::SeqCst);
        self.outstanding.send_modify(|n| *n = n.saturating_sub(drained.len()));
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Item;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn entry(key: &str) -> QueueEntry {
        QueueEntry::new(Item::new(key, "payload", Utc::now()))
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let queue = PendingQueue::unbounded();
        for key in ["a", "b", "c"] {
            queue.enqueue(entry(key)).await.unwrap();
        }

        let keys: Vec<String> = std::iter::from_fn(|| queue.try_pop())
            .map(|e| e.key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(queue.outstanding(), 3);
    }

    #[tokio::test]
    async fn pop_waits_for_an_entry() {
        let queue = Arc::new(PendingQueue::unbounded());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.map(|e| e.key().to_string()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(entry("late")).await.unwrap();

        assert_eq!(consumer.await.unwrap(), Some("late".to_string()));
    }

    #[tokio::test]
    async fn bounded_queue_applies_backpressure() {
        let queue = Arc::new(PendingQueue::new(1));
        queue.enqueue(entry("first")).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(entry("second")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop().await.unwrap().key(), "first");
        producer.await.unwrap().unwrap();
        assert_eq!(queue.pop().await.unwrap().key(), "second");
    }

    #[tokio::test]
    async fn close_drains_and_releases_waiters() {
        let queue = Arc::new(PendingQueue::unbounded());
        queue.enqueue(entry("left-behind")).await.unwrap();

        let drained = queue.close().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.outstanding(), 0);
        assert!(queue.pop().await.is_none());
        assert!(matches!(queue.enqueue(entry("x")).await, Err(RelayError::QueueClosed)));
    }

    #[tokio::test]
    async fn close_fails_a_producer_waiting_for_room() {
        let queue = Arc::new(PendingQueue::new(1));
        queue.enqueue(entry("first")).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(entry("blocked")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let drained = queue.close().await;
        assert_eq!(drained.len(), 1);
        assert!(matches!(producer.await.unwrap(), Err(RelayError::QueueClosed)));
        assert_eq!(queue.outstanding(), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_consumer() {
        let queue = Arc::new(PendingQueue::unbounded());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(queue.close().await.is_empty());
        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeue_does_not_count_twice() {
        let queue = PendingQueue::unbounded();
        queue.enqueue(entry("k")).await.unwrap();
        let taken = queue.pop().await.unwrap();
        queue.requeue(taken).await.unwrap();
        assert_eq!(queue.outstanding(), 1);

        queue.pop().await.unwrap();
        queue.settle();
        queue.wait_idle().await;
        assert_eq!(queue.outstanding(), 0);
    }
}
