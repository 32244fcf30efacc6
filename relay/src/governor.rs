use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Shared minimum-interval gate in front of the publisher.
///
/// One instance serves the whole worker pool, so the spacing applies to
/// aggregate throughput rather than per worker. The gate is held for the
/// duration of the publish call and only a successful publish moves the
/// reference point forward.
#[derive(Clone)]
pub struct RateGovernor {
    min_interval: Duration,
    last_success: Arc<Mutex<Option<Instant>>>,
}

impl RateGovernor {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_success: Arc::new(Mutex::new(None)),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until `min_interval` has passed since the end of the previous
    /// successful window. Waiters are served in arrival order.
    pub async fn acquire(&self) -> RateSlot {
        let guard = self.last_success.clone().lock_owned().await;

        if let Some(last) = *guard {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                debug!("Rate governor holding publish for {:?}", ready_at - Instant::now());
                sleep_until(ready_at).await;
            }
        }

        RateSlot { guard }
    }
}

/// Exclusive right to publish once. Dropping the slot without calling
/// `success` leaves the previous window in place.
pub struct RateSlot {
    guard: OwnedMutexGuard<Option<Instant>>,
}

impl RateSlot {
    pub fn success(mut self) {
        *self.guard = Some(Instant::now());
    }
}
