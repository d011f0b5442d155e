// src/ingest/fetch.rs
//! Bounded retry-with-backoff around page fetches, plus the production
//! reqwest fetcher. Retry decisions come from the typed error class, never
//! from matching on error text.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use tokio::time::{sleep, Instant};

/// Failure class. Transient errors (timeout, rate limit, 5xx, reset) are
/// retried; permanent ones (other 4xx, unusable response) fail immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }
}

/// Transport collaborator: one attempt, no policy.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear backoff: wait `base_delay * attempt` after a transient failure.
    pub base_delay: Duration,
    /// Hard floor between any two requests of the run, retries included.
    pub request_floor: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, request_floor: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(5),
            request_floor,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Wraps a fetcher with the run-wide retry and pacing policy. One instance
/// spans the whole run so the inter-request floor holds across
/// neighborhoods, not just within one.
pub struct FetchController {
    fetcher: Box<dyn PageFetcher>,
    policy: RetryPolicy,
    last_request: Option<Instant>,
}

impl FetchController {
    pub fn new(fetcher: Box<dyn PageFetcher>, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            policy,
            last_request: None,
        }
    }

    /// Fetch with bounded linear backoff. The effective gap between two
    /// requests is max(backoff, floor).
    pub async fn get(&mut self, url: &str) -> Result<String, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.respect_floor().await;
            self.last_request = Some(Instant::now());
            match self.fetcher.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(err) if err.kind == FetchErrorKind::Permanent => {
                    tracing::warn!(url, error = %err, "permanent fetch error");
                    return Err(err);
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        tracing::warn!(url, attempts = attempt, error = %err, "retries exhausted");
                        return Err(err);
                    }
                    counter!("fetch_retries_total").increment(1);
                    let backoff = self.policy.base_delay * attempt;
                    tracing::warn!(
                        url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient fetch error, backing off"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    async fn respect_floor(&self) {
        if let Some(last) = self.last_request {
            let due = last + self.policy.request_floor;
            let now = Instant::now();
            if due > now {
                sleep(due - now).await;
            }
        }
    }
}

/// Production fetcher. StreetEasy serves bot-looking clients a 403, so the
/// client announces itself as an ordinary browser.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            // Timeouts, resets and DNS hiccups all land here; worth another try.
            Err(err) => return Err(FetchError::transient(format!("request failed: {err}"))),
        };
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::transient(format!("HTTP {status} for {url}")));
        }
        if status.is_client_error() {
            return Err(FetchError::permanent(format!("HTTP {status} for {url}")));
        }
        resp.text()
            .await
            .map_err(|err| FetchError::transient(format!("reading body: {err}")))
    }
}
