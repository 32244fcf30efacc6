use crate::sources::success_body;
use crate::traits::Source;
use crate::types::{CandidateItem, RelayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

const NEWS_API_URL: &str = "https://newsapi.org/v2/top-headlines";

/// Top headlines for one country from NewsAPI, keyed by article URL
pub struct NewsApiSource {
    client: Client,
    api_key: String,
    country: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct HeadlinesResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    title: Option<String>,
    url: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

/// Tweet-sized headline text: the headline followed by its link
pub fn headline_payload(headline: &str, url: &str) -> String {
    format!("{} \nRead more: {}", headline.trim(), url)
}

impl NewsApiSource {
    pub fn new(client: Client, api_key: String, country: String) -> Self {
        Self {
            client,
            api_key,
            country,
            endpoint: NEWS_API_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn parse_headlines(&self, body: &str) -> Result<Vec<CandidateItem>> {
        let response: HeadlinesResponse = serde_json::from_str(body).map_err(|e| {
            RelayError::source_failure(self.source_id(), format!("bad response: {}", e))
        })?;

        if response.status != "ok" {
            return Err(RelayError::source_failure(
                self.source_id(),
                response.message.unwrap_or_else(|| format!("status {}", response.status)),
            ));
        }

        let fetched_at = Utc::now();
        let mut candidates = Vec::new();
        for article in response.articles {
            // Articles without a link or a headline cannot be published
            let (Some(title), Some(url)) = (article.title, article.url) else {
                continue;
            };
            if title.trim().is_empty() || url.trim().is_empty() {
                continue;
            }

            let payload = headline_payload(&title, &url);
            let published_at = article.published_at.unwrap_or(fetched_at);
            candidates.push(CandidateItem::new(url, payload, published_at));
        }

        Ok(candidates)
    }
}

#[async_trait]
impl Source for NewsApiSource {
    fn source_id(&self) -> String {
        format!("newsapi/{}", self.country)
    }

    fn source_name(&self) -> String {
        format!("NewsAPI top headlines ({})", self.country)
    }

    async fn fetch_candidates(&self, max: usize) -> Result<Vec<CandidateItem>> {
        let page_size = max.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("country", self.country.as_str()),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RelayError::source_failure(self.source_id(), e))?;

        let body = success_body(&self.source_id(), response).await?;
        let mut candidates = self.parse_headlines(&body)?;
        if candidates.is_empty() {
            warn!("NewsAPI returned no usable articles for {}", self.country);
        }
        candidates.truncate(max);

        info!("Pulled {} headlines for {}", candidates.len(), self.country);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> NewsApiSource {
        NewsApiSource::new(Client::new(), "key".to_string(), "us".to_string())
    }

    #[test]
    fn skips_articles_without_url_or_title() {
        let body = r#"{
            "status": "ok",
            "totalResults": 3,
            "articles": [
                {
                    "title": "Markets rally",
                    "url": "https://news.example/markets",
                    "publishedAt": "2024-05-01T10:00:00Z"
                },
                {"title": null, "url": "https://news.example/untitled"},
                {"title": "No link", "url": null}
            ]
        }"#;

        let candidates = source().parse_headlines(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].key, "https://news.example/markets");
        assert_eq!(
            candidates[0].payload,
            "Markets rally \nRead more: https://news.example/markets"
        );
    }

    #[test]
    fn api_errors_surface_their_message() {
        let body = r#"{
            "status": "error",
            "code": "apiKeyInvalid",
            "message": "Your API key is invalid"
        }"#;
        let err = source().parse_headlines(body).unwrap_err();
        assert!(err.to_string().contains("API key is invalid"));
    }
}
