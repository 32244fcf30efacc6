use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Work the scheduler runs on an interval
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn task_name(&self) -> String;

    async fn run(&self);
}

struct ScheduledTask {
    name: String,
    interval: Duration,
    task: Arc<dyn PeriodicTask>,
    last_run: Option<Instant>,
    running: Arc<AtomicBool>,
}

/// Drives registered periodic tasks from a single fixed-cadence tick.
///
/// Due tasks are spawned, so distinct tasks overlap freely, but a task is
/// never run concurrently with itself: if it is still busy when it comes
/// due, that tick is skipped for it.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    cadence: Duration,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(cadence: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            cadence,
            tracker: TaskTracker::new(),
        }
    }

    pub fn register(&mut self, interval: Duration, task: Arc<dyn PeriodicTask>) {
        let name = task.task_name();
        info!("Registering periodic task {} every {:?}", name, interval);
        self.tasks.push(ScheduledTask {
            name,
            interval,
            task,
            last_run: None,
            running: Arc::new(AtomicBool::new(false)),
        });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Start every task that is due at `now`. A task that has never run is
    /// due on the first tick. Returns how many runs were started.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut started = 0;

        for scheduled in &mut self.tasks {
            let due = match scheduled.last_run {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= scheduled.interval,
            };
            if !due {
                continue;
            }

            scheduled.last_run = Some(now);

            if scheduled.running.swap(true, Ordering::AcqRel) {
                warn!("Task {} still running, skipping this tick", scheduled.name);
                continue;
            }

            debug!("Starting task {}", scheduled.name);
            let task = scheduled.task.clone();
            let running = RunningFlag(scheduled.running.clone());
            self.tracker.spawn(async move {
                let _running = running;
                task.run().await;
            });
            started += 1;
        }

        started
    }

    /// Tick until `cancel` fires, then wait for in-flight runs to finish.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Scheduler started with {} tasks", self.tasks.len());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
            }
        }

        self.drain().await;
        info!("Scheduler stopped");
    }

    /// Wait for every run started so far
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

/// Clears the running flag when a run ends, even if it panicked
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        name: &'static str,
        runs: AtomicUsize,
        hold: Duration,
    }

    impl CountingTask {
        fn new(name: &'static str, hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicUsize::new(0),
                hold,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeriodicTask for CountingTask {
        fn task_name(&self) -> String {
            self.name.to_string()
        }

        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_tasks_on_their_own_intervals() {
        let fast = CountingTask::new("fast", Duration::ZERO);
        let slow = CountingTask::new("slow", Duration::ZERO);

        let mut scheduler = Scheduler::default();
        scheduler.register(Duration::from_secs(2), fast.clone());
        scheduler.register(Duration::from_secs(5), slow.clone());

        let start = Instant::now();
        for second in 0..=10 {
            scheduler.tick(start + Duration::from_secs(second));
            scheduler.drain().await;
        }

        // fast: 0,2,4,6,8,10  slow: 0,5,10
        assert_eq!(fast.runs(), 6);
        assert_eq!(slow.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_task_is_skipped_not_queued() {
        let sticky = CountingTask::new("sticky", Duration::from_secs(10));

        let mut scheduler = Scheduler::default();
        scheduler.register(Duration::from_secs(1), sticky.clone());

        let start = Instant::now();
        assert_eq!(scheduler.tick(start), 1);
        tokio::task::yield_now().await;
        for second in 1..5 {
            assert_eq!(scheduler.tick(start + Duration::from_secs(second)), 0);
        }

        scheduler.drain().await;
        assert_eq!(sticky.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let task = CountingTask::new("loop", Duration::ZERO);
        let mut scheduler = Scheduler::new(Duration::from_secs(1));
        scheduler.register(Duration::from_secs(3), task.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Ticks at 0..=6 seconds: due at 0, 3, 6
        assert_eq!(task.runs(), 3);
    }
}
