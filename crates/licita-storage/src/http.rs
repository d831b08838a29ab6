use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

/// Fetch-by-URL capability the pagination walker drives.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Server-side failures, throttling and request timeouts are worth another try.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Exponential backoff between feed fetch attempts, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_before(&self, retry: usize) -> Duration {
        let doublings = u32::try_from(retry).unwrap_or(u32::MAX).min(31);
        self.base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("feed page {url} answered http {status}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(err) => is_transient_error(err),
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
        }
    }
}

/// reqwest-backed [`PageSource`] that retries transient failures.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder.build().context("building feed http client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    async fn attempt(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        async {
            let mut retry = 0;
            loop {
                match self.attempt(url).await {
                    Ok(body) => return Ok(body),
                    Err(err) if err.is_transient() && retry < self.backoff.max_retries => {
                        let delay = self.backoff.delay_before(retry);
                        warn!(retry = retry + 1, delay_ms = delay.as_millis() as u64, error = %err, "transient feed fetch failure");
                        tokio::time::sleep(delay).await;
                        retry += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        .instrument(info_span!("http_fetch", url))
        .await
    }
}
