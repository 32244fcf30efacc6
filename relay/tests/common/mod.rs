#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use relay::{CandidateItem, PublishOutcome, Publisher, RelayConfig, RelayError, Result, Source};
use std::collections::VecDeque;
use std::sync::{Mutex, Once};
use std::time::Duration;
use tokio::time::Instant;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Config with file logging off and a short publish interval
pub fn test_config() -> RelayConfig {
    RelayConfig {
        workers: 1,
        min_publish_interval: Duration::from_secs(1),
        log_dir: None,
        ..RelayConfig::default()
    }
}

/// Returns the same candidates on every poll
pub struct StaticSource {
    id: String,
    candidates: Vec<CandidateItem>,
}

impl StaticSource {
    pub fn new(id: &str, keys: &[&str]) -> Self {
        let candidates = keys
            .iter()
            .map(|key| CandidateItem::new(*key, format!("payload {}", key), Utc::now()))
            .collect();
        Self {
            id: id.to_string(),
            candidates,
        }
    }

    pub fn with_candidates(id: &str, candidates: Vec<CandidateItem>) -> Self {
        Self {
            id: id.to_string(),
            candidates,
        }
    }
}

#[async_trait]
impl Source for StaticSource {
    fn source_id(&self) -> String {
        self.id.clone()
    }

    async fn fetch_candidates(&self, max: usize) -> Result<Vec<CandidateItem>> {
        Ok(self.candidates.iter().take(max).cloned().collect())
    }
}

pub struct BrokenSource;

#[async_trait]
impl Source for BrokenSource {
    fn source_id(&self) -> String {
        "broken".to_string()
    }

    async fn fetch_candidates(&self, _max: usize) -> Result<Vec<CandidateItem>> {
        Err(RelayError::source_failure("broken", "connection refused"))
    }
}

/// Plays back scripted outcomes (then a fallback) and records every attempt
pub struct RecordingPublisher {
    script: Mutex<VecDeque<PublishOutcome>>,
    fallback: PublishOutcome,
    attempts: Mutex<Vec<(String, Instant, PublishOutcome)>>,
}

impl RecordingPublisher {
    pub fn succeeding() -> Self {
        Self::scripted(Vec::new(), PublishOutcome::Success)
    }

    pub fn always(outcome: PublishOutcome) -> Self {
        Self::scripted(Vec::new(), outcome)
    }

    pub fn scripted(script: Vec<PublishOutcome>, fallback: PublishOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<(String, Instant, PublishOutcome)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Payloads of successful attempts, in order
    pub fn published(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|(_, _, outcome)| outcome.is_success())
            .map(|(payload, _, _)| payload)
            .collect()
    }

    pub fn success_times(&self) -> Vec<Instant> {
        self.attempts()
            .into_iter()
            .filter(|(_, _, outcome)| outcome.is_success())
            .map(|(_, at, _)| at)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn publisher_name(&self) -> String {
        "recording".to_string()
    }

    async fn publish(&self, payload: &str) -> PublishOutcome {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.attempts
            .lock()
            .unwrap()
            .push((payload.to_string(), Instant::now(), outcome.clone()));
        outcome
    }
}
