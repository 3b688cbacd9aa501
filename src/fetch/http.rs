use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};
use url::Url;

use super::{resolve_url, Fetcher, RawDocument};
use crate::config::ScraperConfig;
use crate::utils::FetchError;

/// Plain HTTP GET fetcher. Transport errors, timeouts and 5xx responses are
/// retried with exponential backoff; other statuses fail immediately.
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
    request_timeout: u64,
    retry_attempts: u32,
    retry_delay_ms: u64,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| FetchError::InvalidIdentity {
            identity: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| FetchError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
            retry_attempts: config.retry_attempts,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn fetch_once(&self, url: &Url) -> Result<RawDocument, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                identity: url.to_string(),
                status: status.as_u16(),
            });
        }

        let observed = response.url().to_string();
        let html = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(RawDocument {
            html,
            observed_identity: Some(observed),
        })
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                seconds: self.request_timeout,
            }
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

fn is_transient(err: &FetchError) -> bool {
    match err {
        FetchError::Request(_) | FetchError::Timeout { .. } => true,
        FetchError::Status { status, .. } => *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, identity: &str) -> Result<RawDocument, FetchError> {
        let url = resolve_url(&self.base_url, identity)?;
        debug!(url = %url, "fetching over http");

        // Delays of roughly retry_delay_ms, 2x, 4x... capped at 30s.
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.retry_delay_ms / 2).max(1))
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.retry_attempts as usize);

        RetryIf::start(
            strategy,
            || self.fetch_once(&url),
            |err: &FetchError| {
                let retry = is_transient(err);
                if retry {
                    warn!(url = %url, error = %err, "transient fetch failure, retrying");
                }
                retry
            },
        )
        .await
    }
}
