use crate::retry::{BackoffStrategy, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::types::{FailurePolicy, RelayError, Result};
use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Which concrete source a poller talks to
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Reddit { subreddit: String, prefix: String },
    NewsApi { api_key: String, country: String },
    Rss { url: String },
    Trivia,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub poll_interval: Duration,
    pub max_candidates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublisherConfig {
    /// Nothing configured; rejected by `validate`
    Missing,
    /// Log the payload instead of sending it anywhere. Opt-in only; the
    /// dedup file is read but never written.
    DryRun,
    Webhook { url: String, bearer_token: Option<String> },
}

/// Static configuration for the whole relay, read once at start.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub dedup_path: PathBuf,
    /// 0 = unbounded
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub exponential_backoff: bool,
    pub min_publish_interval: Duration,
    pub recency_horizon: Duration,
    pub blocked_terms: Vec<String>,
    pub failure_policy: FailurePolicy,
    pub namespace_keys: bool,
    pub tick: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub sources: Vec<SourceConfig>,
    pub publisher: PublisherConfig,
    pub log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dedup_path: PathBuf::from("published_items.json"),
            queue_capacity: 0,
            workers: 1,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_secs(5),
            exponential_backoff: false,
            min_publish_interval: Duration::from_secs(15),
            recency_horizon: Duration::from_secs(24 * 60 * 60),
            blocked_terms: Vec::new(),
            failure_policy: FailurePolicy::KeepMarked,
            namespace_keys: true,
            tick: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
            user_agent: "content-relay/0.1".to_string(),
            sources: Vec::new(),
            publisher: PublisherConfig::Missing,
            log_dir: Some(PathBuf::from("logs")),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables (and `.env` if present).
    /// Only parsing happens here; `validate` runs when a pipeline is built,
    /// so state inspection works without publisher credentials.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            dedup_path: env::var("RELAY_DEDUP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dedup_path),
            queue_capacity: env_parse("RELAY_QUEUE_CAPACITY", defaults.queue_capacity)?,
            workers: env_parse("RELAY_WORKERS", defaults.workers)?,
            max_retries: env_parse("RELAY_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff: env_secs("RELAY_RETRY_BACKOFF_SECS", defaults.retry_backoff)?,
            exponential_backoff: env_parse(
                "RELAY_EXPONENTIAL_BACKOFF",
                defaults.exponential_backoff,
            )?,
            min_publish_interval: env_secs(
                "RELAY_PUBLISH_INTERVAL_SECS",
                defaults.min_publish_interval,
            )?,
            recency_horizon: Duration::from_secs(
                env_parse("RELAY_RECENCY_HOURS", 24u64)?.saturating_mul(60 * 60),
            ),
            blocked_terms: env_list("RELAY_BLOCKED_TERMS"),
            failure_policy: match env::var("RELAY_FAILURE_POLICY") {
                Ok(raw) => FailurePolicy::from_str(&raw)?,
                Err(_) => defaults.failure_policy,
            },
            namespace_keys: env_parse("RELAY_NAMESPACE_KEYS", defaults.namespace_keys)?,
            tick: defaults.tick,
            http_timeout: env_secs("RELAY_HTTP_TIMEOUT_SECS", defaults.http_timeout)?,
            user_agent: env::var("RELAY_USER_AGENT").unwrap_or(defaults.user_agent),
            sources: sources_from_env()?,
            publisher: publisher_from_env()?,
            log_dir: match env::var("RELAY_LOG_DIR") {
                Ok(dir) if dir.is_empty() => None,
                Ok(dir) => Some(PathBuf::from(dir)),
                Err(_) => defaults.log_dir,
            },
        };

        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RelayError::Configuration("worker count must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(RelayError::Configuration("max retries must be at least 1".to_string()));
        }
        if self.tick.is_zero() {
            return Err(RelayError::Configuration("scheduler tick must be positive".to_string()));
        }

        for source in &self.sources {
            if source.poll_interval.is_zero() {
                return Err(RelayError::Configuration(format!(
                    "{:?} has a zero poll interval",
                    source.kind
                )));
            }
            if source.max_candidates == 0 {
                return Err(RelayError::Configuration(format!(
                    "{:?} asks for zero candidates",
                    source.kind
                )));
            }
            match &source.kind {
                SourceKind::Rss { url } => validate_url(url)?,
                SourceKind::NewsApi { api_key, .. } if api_key.trim().is_empty() => {
                    return Err(RelayError::Configuration("NEWS_API_KEY is empty".to_string()));
                }
                SourceKind::Reddit { subreddit, .. } if subreddit.trim().is_empty() => {
                    return Err(RelayError::Configuration("REDDIT_SUBREDDIT is empty".to_string()));
                }
                _ => {}
            }
        }

        match &self.publisher {
            PublisherConfig::Missing => {
                return Err(RelayError::Configuration(
                    "no publisher configured: set PUBLISH_WEBHOOK_URL, or opt into a dry run \
                     with RELAY_PUBLISHER=dry-run / --dry-run"
                        .to_string(),
                ));
            }
            PublisherConfig::Webhook { url, .. } => validate_url(url)?,
            PublisherConfig::DryRun => {}
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.exponential_backoff {
            BackoffStrategy::Exponential {
                initial: self.retry_backoff,
                multiplier: 2.0,
                max: self.retry_backoff * 32,
            }
        } else {
            BackoffStrategy::Fixed(self.retry_backoff)
        };
        RetryPolicy::new(self.max_retries, backoff)
    }

    pub fn recency_horizon_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.recency_horizon)
            .unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}

fn publisher_from_env() -> anyhow::Result<PublisherConfig> {
    let webhook = env::var("PUBLISH_WEBHOOK_URL")
        .ok()
        .filter(|url| !url.trim().is_empty());

    let selected = env::var("RELAY_PUBLISHER").ok();
    match selected.as_deref().map(str::trim) {
        Some("dry-run") | Some("dry_run") => Ok(PublisherConfig::DryRun),
        Some("webhook") | Some("") | None => Ok(match webhook {
            Some(url) => PublisherConfig::Webhook {
                url,
                bearer_token: env::var("PUBLISH_BEARER_TOKEN").ok(),
            },
            None => PublisherConfig::Missing,
        }),
        Some(other) => {
            anyhow::bail!("RELAY_PUBLISHER must be 'webhook' or 'dry-run', got '{}'", other)
        }
    }
}

fn sources_from_env() -> anyhow::Result<Vec<SourceConfig>> {
    let mut sources = Vec::new();

    if let Ok(subreddit) = env::var("REDDIT_SUBREDDIT") {
        sources.push(SourceConfig {
            kind: SourceKind::Reddit {
                subreddit,
                prefix: env::var("REDDIT_POST_PREFIX")
                    .unwrap_or_else(|_| "Meme del día:".to_string()),
            },
            poll_interval: env_secs("REDDIT_POLL_SECS", Duration::from_secs(45))?,
            max_candidates: env_parse("REDDIT_MAX_POSTS", 7)?,
        });
    }

    if let Ok(api_key) = env::var("NEWS_API_KEY") {
        sources.push(SourceConfig {
            kind: SourceKind::NewsApi {
                api_key,
                country: env::var("NEWS_COUNTRY").unwrap_or_else(|_| "us".to_string()),
            },
            poll_interval: env_secs("NEWS_POLL_SECS", Duration::from_secs(45))?,
            max_candidates: env_parse("NEWS_PAGE_SIZE", 10)?,
        });
    }

    for url in env_list("RSS_FEED_URLS") {
        sources.push(SourceConfig {
            kind: SourceKind::Rss { url },
            poll_interval: env_secs("RSS_POLL_SECS", Duration::from_secs(900))?,
            max_candidates: env_parse("RSS_MAX_ITEMS", 10)?,
        });
    }

    if env_parse("TRIVIA_ENABLED", false)? {
        sources.push(SourceConfig {
            kind: SourceKind::Trivia,
            poll_interval: env_secs("TRIVIA_POLL_SECS", Duration::from_secs(60))?,
            max_candidates: 1,
        });
    }

    Ok(sources)
}

fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| RelayError::Configuration(format!("invalid URL '{}': {}", raw, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(RelayError::Configuration(format!("unsupported URL scheme in '{}'", raw)));
    }
    Ok(())
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid value, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(env_parse(name, default.as_secs())?))
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_once_a_publisher_is_chosen() {
        let config = RelayConfig {
            publisher: PublisherConfig::DryRun,
            ..RelayConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.retry_policy(), RetryPolicy::fixed(3, Duration::from_secs(5)));
    }

    #[test]
    fn missing_publisher_is_fatal() {
        let err = RelayConfig::default().validate().unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let config = RelayConfig {
            workers: 0,
            publisher: PublisherConfig::DryRun,
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Configuration(_))));
    }

    #[test]
    fn rss_sources_need_http_urls() {
        let config = RelayConfig {
            sources: vec![SourceConfig {
                kind: SourceKind::Rss {
                    url: "ftp://example.com/feed.xml".to_string(),
                },
                poll_interval: Duration::from_secs(60),
                max_candidates: 5,
            }],
            ..RelayConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_news_key_is_rejected() {
        let config = RelayConfig {
            sources: vec![SourceConfig {
                kind: SourceKind::NewsApi {
                    api_key: " ".to_string(),
                    country: "us".to_string(),
                },
                poll_interval: Duration::from_secs(60),
                max_candidates: 10,
            }],
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
