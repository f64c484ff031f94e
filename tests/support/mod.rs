//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;
use std::time::Duration;

use harvester_core::{RateLimiter, RetryPolicy, RetryingTransport};

/// Transport with no pacing and a single attempt per request.
pub fn quick_transport() -> RetryingTransport {
    transport_with(RetryPolicy::with_max_attempts(1))
}

/// Transport with no pacing and a fast, jitter-free retry schedule.
pub fn retrying_transport(max_attempts: u32) -> RetryingTransport {
    transport_with(
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(10),
            Duration::from_millis(50),
            2.0,
        )
        .with_max_jitter(Duration::ZERO),
    )
}

fn transport_with(policy: RetryPolicy) -> RetryingTransport {
    RetryingTransport::new(
        "harvester-tests/0 (tests@example.com)",
        Duration::from_secs(5),
        policy,
        Arc::new(RateLimiter::disabled()),
    )
    .expect("transport builds")
}
