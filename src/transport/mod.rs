//! HTTP transport: global pacing, failure classification and bounded retries.
//!
//! [`RetryingTransport::send`] is the only way sources talk to the network.
//! Each attempt waits on the shared [`RateLimiter`], runs under a per-attempt
//! timeout, and failures are classified by [`classify_error`] to decide between
//! another attempt (with exponential backoff and jitter) and an immediate error.

mod client;
pub mod constants;
mod error;
mod rate_limiter;
mod retry;

pub use client::{ApiRequest, ApiResponse, RetryingTransport, TransportStats};
pub use error::{AttemptError, TransportError};
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
};
