//! HTTP transport for the remote rule document.

use async_trait::async_trait;
use reqwest::Client;

use crate::config::KernelConfig;
use super::{RuleCacheError, RuleFetcher};

/// Fetches the rule document over HTTP(S) with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpRuleFetcher {
    client: Client,
    url: String,
}

impl HttpRuleFetcher {
    /// Create a fetcher from configuration.
    pub fn new(config: &KernelConfig) -> Result<Self, RuleCacheError> {
        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RuleCacheError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: config.rules_url.clone(),
        })
    }
}

#[async_trait]
impl RuleFetcher for HttpRuleFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, RuleCacheError> {
        tracing::info!(url = %self.url, "Downloading community rules");

        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RuleCacheError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuleCacheError::Network(format!("HTTP {} from {}", status, self.url)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RuleCacheError::Network(e.to_string()))?;
        Ok(body.to_vec())
    }

    fn source_url(&self) -> &str {
        &self.url
    }
}
