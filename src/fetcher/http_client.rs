use crate::config::FetcherConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

use super::DailyFileSource;

/// Provider download client. One attempt per URL; no retries.
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            request_delay: Duration::from_millis(config.request_delay_ms),
        })
    }
}

#[async_trait]
impl DailyFileSource for HttpClient {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        if !self.request_delay.is_zero() {
            sleep(self.request_delay).await;
        }

        debug!("GET {}", url);
        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("reading body: {e}")))?;
        Ok(body.to_vec())
    }
}
