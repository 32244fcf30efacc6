use crate::sources::success_body;
use crate::traits::Source;
use crate::types::{CandidateItem, RelayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

const REDDIT_BASE_URL: &str = "https://www.reddit.com";

/// Newest posts of one subreddit, keyed by their shortlink
pub struct RedditSource {
    client: Client,
    subreddit: String,
    prefix: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    created_utc: f64,
    #[serde(default)]
    stickied: bool,
}

impl RedditSource {
    pub fn new(client: Client, subreddit: String) -> Self {
        Self {
            client,
            subreddit,
            prefix: "Meme del día:".to_string(),
            base_url: REDDIT_BASE_URL.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: String) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Turn a `/new.json` listing body into candidates
    pub fn parse_listing(&self, body: &str) -> Result<Vec<CandidateItem>> {
        let listing: Listing = serde_json::from_str(body).map_err(|e| {
            RelayError::source_failure(self.source_id(), format!("bad listing: {}", e))
        })?;

        let candidates = listing
            .data
            .children
            .into_iter()
            .map(|child| child.data)
            .filter(|post| !post.stickied)
            .map(|post| {
                let shortlink = format!("https://redd.it/{}", post.id);
                let payload = if self.prefix.is_empty() {
                    shortlink.clone()
                } else {
                    format!("{} {}", self.prefix, shortlink)
                };
                CandidateItem::new(shortlink, payload, created_at(post.created_utc))
            })
            .collect();

        Ok(candidates)
    }
}

fn created_at(created_utc: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(created_utc as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl Source for RedditSource {
    fn source_id(&self) -> String {
        format!("reddit/{}", self.subreddit)
    }

    fn source_name(&self) -> String {
        format!("r/{}", self.subreddit)
    }

    async fn fetch_candidates(&self, max: usize) -> Result<Vec<CandidateItem>> {
        let url = format!("{}/r/{}/new.json", self.base_url, self.subreddit);
        debug!("Fetching listing: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("limit", max.to_string())])
            .send()
            .await
            .map_err(|e| RelayError::source_failure(self.source_id(), e))?;

        let body = success_body(&self.source_id(), response).await?;
        let mut candidates = self.parse_listing(&body)?;
        candidates.truncate(max);

        info!("Pulled {} posts from r/{}", candidates.len(), self.subreddit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
        "kind": "Listing",
        "data": {
            "children": [
                {"kind": "t3", "data": {"id": "1abcd", "created_utc": 1700000000.0,
                    "title": "first"}},
                {"kind": "t3", "data": {"id": "pinned", "created_utc": 1600000000.0,
                    "stickied": true}},
                {"kind": "t3", "data": {"id": "2efgh", "created_utc": 1700000100.0}}
            ]
        }
    }"#;

    #[test]
    fn parses_shortlinks_and_skips_stickied_posts() {
        let source = RedditSource::new(Client::new(), "memes".to_string());
        let candidates = source.parse_listing(LISTING).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].key, "https://redd.it/1abcd");
        assert_eq!(candidates[0].payload, "Meme del día: https://redd.it/1abcd");
        assert_eq!(candidates[0].timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn malformed_listing_is_a_source_error() {
        let source = RedditSource::new(Client::new(), "memes".to_string());
        assert!(matches!(source.parse_listing("<html>"), Err(RelayError::Source { .. })));
    }
}
