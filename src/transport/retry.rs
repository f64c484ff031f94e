//! Retry logic with exponential backoff for transient request failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying attempt errors and determining retry behavior.
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - 5xx, timeouts and connection errors
//! - [`FailureType::Permanent`] - 4xx (other than 429/401/403) and TLS failures
//! - [`FailureType::NeedsAuth`] - 401/403, usually a missing contact header
//! - [`FailureType::RateLimited`] - 429, retried with backoff and Retry-After
//!
//! The [`RetryPolicy`] then determines whether to retry based on failure type
//! and attempt count, calculating exponential backoff delays with jitter.
//!
//! # Example
//!
//! ```
//! use harvester_core::transport::{
//!     AttemptError, RetryPolicy, FailureType, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = AttemptError::http_status("https://export.arxiv.org/api/query", 503);
//! let failure_type = classify_error(&error);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::AttemptError;

/// Default maximum attempts per logical request (initial attempt included).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base delay for exponential backoff (2 seconds).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default maximum delay cap (60 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default maximum jitter added to delays (500ms).
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of attempt failure types.
///
/// Used to determine whether a failed attempt should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 400 Bad Request, TLS failure.
    Permanent,

    /// The provider refused the caller (401/403).
    NeedsAuth,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

impl FailureType {
    /// Returns true for failure types the retry loop may attempt again.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the request.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `base_delay`: 2 seconds
/// - `max_delay`: 60 seconds
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: 500 ms
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 2s, 4s, 8s, 16s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f32,

    /// Upper bound of the random jitter added to every delay.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (must be >= 1)
    /// * `base_delay` - Base delay for first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the jitter bound. Zero makes delays deterministic.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "request refused - retry without a contact header would not help"
                        .to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry attempt with exponential backoff and jitter.
    ///
    /// Formula: `min(base_delay * multiplier^(attempt-1), max_delay) + jitter`
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = multiplier^0
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and `max_jitter`.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

/// Classifies an attempt error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type |
/// |--------|------|
/// | 401, 403 | NeedsAuth |
/// | 429 | RateLimited |
/// | other 4xx | Permanent |
/// | 5xx | Transient |
///
/// # Non-HTTP Errors
///
/// | Error | Type |
/// |-------|------|
/// | Timeout | Transient |
/// | Network (most) | Transient |
/// | Network (TLS) | Permanent |
#[instrument]
pub fn classify_error(error: &AttemptError) -> FailureType {
    match error {
        AttemptError::HttpStatus { status, .. } => classify_http_status(*status),
        AttemptError::Timeout { .. } => FailureType::Transient,
        AttemptError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
    }
}

/// Classifies an HTTP status code into a failure type.
#[allow(clippy::match_same_arms)]
pub(crate) fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 => FailureType::NeedsAuth,
        429 => FailureType::RateLimited,
        // 408 included: every 4xx other than 429 fails fast
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
pub(crate) fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
