use crate::sources::news_api::headline_payload;
use crate::sources::success_body;
use crate::traits::Source;
use crate::types::{CandidateItem, RelayError, Result};
use async_trait::async_trait;
use chrono::Utc;
use feed_rs::parser;
use reqwest::Client;
use tracing::{debug, info};

/// Generic RSS/Atom feed, relayed as headline + link
pub struct RssHeadlineSource {
    client: Client,
    url: String,
}

impl RssHeadlineSource {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }

    pub fn parse_feed(&self, content: &str) -> Result<Vec<CandidateItem>> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| RelayError::Parse(format!("Failed to parse feed {}: {}", self.url, e)))?;

        let fetched_at = Utc::now();
        let candidates = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                // Get the primary link
                let link = entry.links.first()?.href.clone();
                let title = entry.title.map(|t| t.content)?;
                let timestamp = entry.published.or(entry.updated).unwrap_or(fetched_at);
                Some(CandidateItem::new(link.clone(), headline_payload(&title, &link), timestamp))
            })
            .collect();

        Ok(candidates)
    }
}

#[async_trait]
impl Source for RssHeadlineSource {
    fn source_id(&self) -> String {
        format!("rss/{}", self.url)
    }

    fn source_name(&self) -> String {
        // Extract domain name from URL as fallback
        match url::Url::parse(&self.url).ok().and_then(|u| u.domain().map(str::to_string)) {
            Some(domain) => format!("RSS Feed ({})", domain),
            None => "RSS Feed".to_string(),
        }
    }

    async fn fetch_candidates(&self, max: usize) -> Result<Vec<CandidateItem>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RelayError::source_failure(self.source_id(), e))?;

        let content = success_body(&self.source_id(), response).await?;
        let mut candidates = self.parse_feed(&content)?;
        candidates.truncate(max);

        info!("Pulled {} entries from {}", candidates.len(), self.url);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://news.example</link>
    <description>Headlines</description>
    <item>
      <title>Rust 2.0 announced</title>
      <link>https://news.example/rust</link>
      <pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn entries_become_headline_candidates() {
        let source = RssHeadlineSource::new(Client::new(), "https://news.example/rss".to_string());
        let candidates = source.parse_feed(FEED).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].key, "https://news.example/rust");
        assert!(candidates[0].payload.starts_with("Rust 2.0 announced"));
        assert_eq!(source.source_name(), "RSS Feed (news.example)");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let source = RssHeadlineSource::new(Client::new(), "https://news.example/rss".to_string());
        assert!(matches!(source.parse_feed("not xml at all"), Err(RelayError::Parse(_))));
    }
}
