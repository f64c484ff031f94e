//! Shared helpers for unit tests.

pub mod socket_guard;

use std::sync::Arc;
use std::time::Duration;

use crate::transport::{RateLimiter, RetryPolicy, RetryingTransport};

/// Transport with no pacing and a single attempt per request.
#[allow(clippy::unwrap_used)]
pub fn quick_transport() -> RetryingTransport {
    RetryingTransport::new(
        "harvester-tests/0 (tests@example.com)",
        Duration::from_secs(5),
        RetryPolicy::with_max_attempts(1),
        Arc::new(RateLimiter::disabled()),
    )
    .unwrap()
}
