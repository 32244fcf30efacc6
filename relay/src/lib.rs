pub mod config;
pub mod dedup;
pub mod filter;
pub mod governor;
pub mod logging;
pub mod pipeline;
pub mod poller;
pub mod publishers;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod sources;
pub mod stats;
pub mod traits;
pub mod types;
pub mod utils;
pub mod worker;

pub use types::*;
pub use config::{PublisherConfig, RelayConfig, SourceConfig, SourceKind};
pub use dedup::{DedupStore, JsonFilePersistence, MemoryPersistence};
pub use filter::ItemFilter;
pub use governor::RateGovernor;
pub use pipeline::{PipelineBuilder, RelayPipeline, RunningRelay};
pub use poller::{PollerConfig, SourcePoller};
pub use queue::PendingQueue;
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use scheduler::{PeriodicTask, Scheduler};
pub use stats::{PipelineStats, StatsSnapshot};
pub use traits::{Persistence, Publisher, Source};
pub use worker::{WorkerContext, WorkerPool};
