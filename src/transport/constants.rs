//! Constants for the transport module (timeouts, rate limiting, response handling).

use std::time::Duration;

/// HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-attempt timeout covering connect, headers and body (30 seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Warning threshold for cumulative rate limit delay (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// How much of an error response body is kept for diagnostics.
pub const BODY_SNIPPET_CHARS: usize = 300;
