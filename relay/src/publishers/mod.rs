pub mod dry_run;
pub mod webhook;

pub use dry_run::DryRunPublisher;
pub use webhook::WebhookPublisher;

use crate::config::{PublisherConfig, RelayConfig};
use crate::sources::http_client;
use crate::traits::Publisher;
use crate::types::{RelayError, Result};
use std::sync::Arc;

/// Build the publisher the configuration asks for
pub fn build_publisher(config: &RelayConfig) -> Result<Arc<dyn Publisher>> {
    let publisher: Arc<dyn Publisher> = match &config.publisher {
        PublisherConfig::Missing => {
            return Err(RelayError::Configuration("no publisher configured".to_string()));
        }
        PublisherConfig::DryRun => Arc::new(DryRunPublisher::default()),
        PublisherConfig::Webhook { url, bearer_token } => {
            let client = http_client(&config.user_agent, config.http_timeout)?;
            Arc::new(WebhookPublisher::new(client, url.clone(), bearer_token.clone()))
        }
    };
    Ok(publisher)
}
