use crate::traits::Publisher;
use crate::types::PublishOutcome;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

/// POSTs `{"text": payload}` to an HTTP endpoint (a bridge in front of the
/// microblogging API, a chat webhook, ...).
pub struct WebhookPublisher {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    text: &'a str,
}

impl WebhookPublisher {
    pub fn new(client: Client, url: String, bearer_token: Option<String>) -> Self {
        Self {
            client,
            url,
            bearer_token,
        }
    }
}

/// Map an HTTP status onto a publish outcome. Throttling and server-side
/// errors are worth retrying; any other client error is not.
pub fn classify_status(status: StatusCode) -> PublishOutcome {
    if status.is_success() {
        PublishOutcome::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PublishOutcome::Transient(format!("HTTP {}", status))
    } else {
        PublishOutcome::Permanent(format!("HTTP {}", status))
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn publisher_name(&self) -> String {
        format!("webhook({})", self.url)
    }

    async fn publish(&self, payload: &str) -> PublishOutcome {
        let mut request = self.client.post(&self.url).json(&PublishRequest { text: payload });
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let outcome = classify_status(response.status());
                if !outcome.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    warn!("Publish endpoint answered {}: {}", outcome, body);
                } else {
                    debug!("Published to {}", self.url);
                }
                outcome
            }
            // Network trouble (DNS, reset, timeout) is always worth another try
            Err(e) => PublishOutcome::Transient(e.to_string()),
        }
    }
}
