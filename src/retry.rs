//! Outbound HTTP with bounded exponential backoff.
//!
//! Every attempt runs under a fixed timeout. Connection failures, timeouts,
//! HTTP 429 and HTTP 5xx are retried with
//! `min(base * 2^attempt + jitter, max)` between attempts, where the jitter
//! is a random 0-100ms. When a retryable response tells us when to come
//! back (`Retry-After`, or an `X-RateLimit-Reset` epoch timestamp) that
//! hint replaces the computed backoff, still capped at the maximum delay.
//! Other statuses are returned to the caller as-is.
//! After the last retry the final error is handed back as a [`RetryError`].
//!
//! Time is injected through [`Sleeper`] so the backoff and the timeout can be
//! driven without waiting on a real clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Upper bound of the random jitter added to each backoff delay
const MAX_JITTER_MS: u64 = 100;

const RETRY_AFTER: &str = "retry-after";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// A GET request to the upstream provider
#[derive(Debug, Clone, Default)]
pub struct OutboundRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    /// How long the upstream asked us to wait before trying again
    pub retry_after: Option<Duration>,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Terminal failure after every attempt has been used
#[derive(Debug, Error)]
#[error("request failed after {attempts} attempts: {last}")]
pub struct RetryError {
    pub attempts: u32,
    pub last: TransportError,
}

/// Sends one request. Implementations should stop work once `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &OutboundRequest,
        cancel: CancellationToken,
    ) -> Result<UpstreamResponse, TransportError>;
}

/// Suspends the current task.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// [`Transport`] over a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        cancel: CancellationToken,
    ) -> Result<UpstreamResponse, TransportError> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let exchange = async {
            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            let status = response.status().as_u16();
            let headers = response.headers();
            let retry_after = retry_hint(
                headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
                headers.get(RATE_LIMIT_RESET).and_then(|v| v.to_str().ok()),
                Utc::now(),
            );
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            let body = if bytes.is_empty() {
                Value::Null
            } else {
                match serde_json::from_slice(&bytes) {
                    Ok(value) => value,
                    // Error pages are often HTML; only a 2xx body has to be JSON.
                    Err(_) if !(200..300).contains(&status) => Value::Null,
                    Err(e) => return Err(TransportError::Decode(e.to_string())),
                }
            };

            Ok(UpstreamResponse {
                status,
                body,
                retry_after,
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = exchange => result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(3000),
            timeout: Duration::from_millis(8000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            timeout: config.request_timeout(),
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based)
    pub fn backoff_delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max_delay)
    }
}

/// Reads the upstream's own wait hint.
///
/// `Retry-After` may be delta-seconds or an HTTP date; `X-RateLimit-Reset`
/// is a Unix timestamp in seconds. A time already in the past means "now".
fn retry_hint(
    retry_after: Option<&str>,
    rate_limit_reset: Option<&str>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let until = |at: DateTime<Utc>| (at - now).to_std().unwrap_or(Duration::ZERO);

    if let Some(value) = retry_after.map(str::trim) {
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            return Some(until(at.with_timezone(&Utc)));
        }
    }

    rate_limit_reset
        .and_then(|value| value.trim().parse::<i64>().ok())
        .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0))
        .map(until)
}

fn random_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS))
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Retry-with-backoff wrapper around a [`Transport`]
#[derive(Clone)]
pub struct RetryClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl RetryClient {
    pub fn new(transport: Arc<dyn Transport>, sleeper: Arc<dyn Sleeper>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    pub async fn request_with_retry(
        &self,
        request: &OutboundRequest,
    ) -> Result<UpstreamResponse, RetryError> {
        let attempts = self.policy.max_retries + 1;
        let mut last_error = TransportError::Network("no attempt made".to_string());

        for attempt in 0..attempts {
            let mut hint = None;

            match self.attempt(request).await {
                Ok(response) if is_retryable_status(response.status) => {
                    tracing::warn!(
                        target: "crime_proxy::retry",
                        attempt = attempt + 1,
                        status = response.status,
                        retry_after_ms = response.retry_after.map(|d| d.as_millis() as u64),
                        "Upstream returned retryable status"
                    );
                    hint = response.retry_after;
                    last_error = TransportError::Status(response.status);
                }
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            target: "crime_proxy::retry",
                            attempt = attempt + 1,
                            "Upstream request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "crime_proxy::retry",
                        attempt = attempt + 1,
                        error = %e,
                        "Upstream attempt failed"
                    );
                    last_error = e;
                }
            }

            if attempt + 1 < attempts {
                let delay = match hint {
                    Some(wait) => wait.min(self.policy.max_delay),
                    None => self.policy.backoff_delay(attempt, random_jitter()),
                };
                tracing::debug!(
                    target: "crime_proxy::retry",
                    retry = attempt + 1,
                    max_retries = self.policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                self.sleeper.sleep(delay).await;
            }
        }

        tracing::error!(
            target: "crime_proxy::retry",
            attempts,
            error = %last_error,
            "Upstream request failed, giving up"
        );

        Err(RetryError {
            attempts,
            last: last_error,
        })
    }

    async fn attempt(&self, request: &OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        let cancel = CancellationToken::new();
        let timeout = self.policy.timeout;

        tokio::select! {
            biased;
            result = self.transport.send(request, cancel.clone()) => result,
            _ = self.sleeper.sleep(timeout) => {
                cancel.cancel();
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}
