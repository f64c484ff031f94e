//! The retrying, rate-limited HTTP transport used by every source.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::CONNECT_TIMEOUT_SECS;
use super::error::{AttemptError, TransportError};
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};

/// A GET request against a provider endpoint.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    url: Url,
    headers: Vec<(String, String)>,
}

impl ApiRequest {
    /// Starts a GET request for `base`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] when `base` is not an absolute URL.
    pub fn get(base: &str) -> Result<Self, TransportError> {
        let url =
            Url::parse(base).map_err(|e| TransportError::invalid_request(base, e.to_string()))?;
        Ok(Self {
            url,
            headers: Vec::new(),
        })
    }

    /// Appends a query parameter (percent-encoded).
    #[must_use]
    pub fn query(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.url.query_pairs_mut().append_pair(key, value.as_ref());
        self
    }

    /// Appends a query parameter only when a value is present.
    #[must_use]
    pub fn query_opt(self, key: &str, value: Option<impl AsRef<str>>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Returns the fully built URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// A successful (2xx) response with its body fully read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// The URL that was requested.
    pub url: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body as text.
    pub body: String,
}

impl ApiResponse {
    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Decode`] when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::decode(&self.url, e))
    }

    /// Returns the body text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Returns a header value if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Counters for attempts made by a transport.
#[derive(Debug, Default)]
pub struct TransportStats {
    attempts: AtomicU64,
    retries: AtomicU64,
}

impl TransportStats {
    /// Total HTTP attempts (initial attempts plus retries).
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Attempts that were retries of an earlier failure.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::SeqCst)
    }
}

/// Per-request retry bookkeeping. Lives for one `send` call.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    next_delay: Duration,
}

/// Issues logical requests with pacing, per-attempt timeouts and bounded retries.
#[derive(Debug)]
pub struct RetryingTransport {
    client: Client,
    policy: RetryPolicy,
    timeout: Duration,
    rate_limiter: Arc<RateLimiter>,
    stats: TransportStats,
}

impl RetryingTransport {
    /// Builds a transport that sends `user_agent` on every request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] when the HTTP client cannot be built.
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        policy: RetryPolicy,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .gzip(true)
            .build()
            .map_err(|e| TransportError::Build {
                reason: e.to_string(),
            })?;

        debug!(
            user_agent,
            timeout_ms = timeout.as_millis(),
            max_attempts = policy.max_attempts(),
            "transport ready"
        );

        Ok(Self {
            client,
            policy,
            timeout,
            rate_limiter,
            stats: TransportStats::default(),
        })
    }

    /// Returns the attempt counters.
    #[must_use]
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Sends `request`, retrying retryable failures.
    ///
    /// Every attempt, retries included, first passes through the rate limiter.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Client`] for 4xx other than 429 (never retried)
    /// - [`TransportError::Exhausted`] when every attempt failed retryably
    /// - [`TransportError::Connection`] for TLS failures
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = request.url().as_str();
        let mut state = RetryState {
            attempt: 0,
            next_delay: Duration::ZERO,
        };

        loop {
            state.attempt += 1;
            self.rate_limiter.acquire().await;
            self.stats.attempts.fetch_add(1, Ordering::SeqCst);
            if state.attempt > 1 {
                self.stats.retries.fetch_add(1, Ordering::SeqCst);
            }

            let error = match self.attempt(request).await {
                Ok(response) => {
                    debug!(attempt = state.attempt, status = response.status, "request succeeded");
                    return Ok(response);
                }
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            let retry_after = if failure_type == FailureType::RateLimited {
                self.extract_retry_after_delay(&error)
            } else {
                None
            };

            match self.policy.should_retry(failure_type, state.attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    state.next_delay =
                        retry_after.map_or(backoff_delay, |delay| delay.max(backoff_delay));
                    warn!(
                        url,
                        attempt = next_attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = state.next_delay.as_millis(),
                        using_retry_after = retry_after.is_some(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(state.next_delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, %reason, attempts = state.attempt, "not retrying request");
                    return Err(final_error(url, failure_type, error, state.attempt));
                }
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse, AttemptError> {
        let url = request.url().as_str();
        let exchange = async {
            let mut builder = self.client.get(request.url().clone());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| self.classify_send_error(url, e))?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .text()
                .await
                .map_err(|e| self.classify_send_error(url, e))?;

            if !(200..300).contains(&status) {
                let retry_after = headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                return Err(AttemptError::http_status_with_details(
                    url,
                    status,
                    retry_after,
                    &body,
                ));
            }

            Ok(ApiResponse {
                status,
                url: url.to_string(),
                headers,
                body,
            })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::timeout(url, self.timeout.as_secs().max(1))),
        }
    }

    fn classify_send_error(&self, url: &str, error: reqwest::Error) -> AttemptError {
        if error.is_timeout() {
            AttemptError::timeout(url, self.timeout.as_secs().max(1))
        } else {
            AttemptError::network(url, error)
        }
    }

    /// Parses Retry-After from a 429 and records it with the shared clock.
    fn extract_retry_after_delay(&self, error: &AttemptError) -> Option<Duration> {
        let AttemptError::HttpStatus {
            retry_after: Some(header),
            url,
            ..
        } = error
        else {
            return None;
        };

        let delay = parse_retry_after(header)?;
        self.rate_limiter.record_rate_limit(delay);

        debug!(
            url = %url,
            retry_after = %header,
            delay_ms = delay.as_millis(),
            "using Retry-After header delay"
        );

        Some(delay)
    }
}

fn final_error(
    url: &str,
    failure_type: FailureType,
    error: AttemptError,
    attempts: u32,
) -> TransportError {
    if failure_type.is_retryable() {
        return TransportError::exhausted(url, attempts, &error);
    }
    match error {
        AttemptError::HttpStatus { status, body, .. } => TransportError::client(url, status, body),
        other => TransportError::Connection {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}
