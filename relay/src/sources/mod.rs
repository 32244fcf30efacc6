pub mod news_api;
pub mod reddit;
pub mod rss_feed;
pub mod trivia;

pub use news_api::NewsApiSource;
pub use reddit::RedditSource;
pub use rss_feed::RssHeadlineSource;
pub use trivia::TriviaSource;

use crate::config::{RelayConfig, SourceConfig, SourceKind};
use crate::traits::Source;
use crate::types::{RelayError, Result};
use reqwest::{Client, Response};
use std::time::Duration;

/// Shared HTTP client settings for every source
pub fn http_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()?;
    Ok(client)
}

/// Build the source a config entry describes
pub fn build_source(source: &SourceConfig, config: &RelayConfig) -> Result<Box<dyn Source>> {
    let client = http_client(&config.user_agent, config.http_timeout)?;

    let built: Box<dyn Source> = match &source.kind {
        SourceKind::Reddit { subreddit, prefix } => {
            Box::new(RedditSource::new(client, subreddit.clone()).with_prefix(prefix.clone()))
        }
        SourceKind::NewsApi { api_key, country } => {
            Box::new(NewsApiSource::new(client, api_key.clone(), country.clone()))
        }
        SourceKind::Rss { url } => Box::new(RssHeadlineSource::new(client, url.clone())),
        SourceKind::Trivia => Box::new(TriviaSource::new(client)),
    };

    Ok(built)
}

/// Read a response body, turning non-2xx statuses into a source error
pub(crate) async fn success_body(source_id: &str, response: Response) -> Result<String> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::source_failure(
            source_id,
            format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
        ));
    }
    Ok(response.text().await?)
}
