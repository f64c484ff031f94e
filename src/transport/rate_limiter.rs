//! Global request pacing.
//!
//! This module provides the [`RateLimiter`] struct which enforces a minimum
//! interval between *any* two outbound requests of a run. There is a single
//! shared clock: retries, pagination requests and requests to different hosts
//! all pass through the same gate.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::transport::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(500));
//!
//! // First request proceeds immediately
//! limiter.acquire().await;
//!
//! // Second request waits until 500ms after the first was released
//! limiter.acquire().await;
//! # }
//! ```

use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Minimum-interval gate shared by every request of a run.
///
/// The release timestamp is guarded by a `tokio::sync::Mutex`, which hands
/// the lock to waiters in FIFO order; the guard is held across the sleep so
/// concurrent callers are released one interval apart in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum time between two releases.
    interval: Duration,

    /// When the previous `acquire()` returned. `None` until the first request.
    last_release: Mutex<Option<Instant>>,

    /// Server-mandated pause (Retry-After) that the next release must respect.
    not_before: std::sync::Mutex<Option<Instant>>,

    /// Total delay imposed so far, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified interval.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            interval,
            last_release: Mutex::new(None),
            not_before: std::sync::Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a rate limiter from a fractional number of seconds.
    ///
    /// Negative and non-finite values disable pacing.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_finite() && secs > 0.0 {
            Self::new(Duration::from_secs_f64(secs))
        } else {
            Self::disabled()
        }
    }

    /// Creates a rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether pacing is disabled (zero interval).
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    /// Returns the configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the total delay this limiter has imposed so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Waits until at least `interval` has elapsed since the previous release.
    ///
    /// The first call returns immediately. Never fails.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        if self.is_disabled() {
            return;
        }

        let mut last_release = self.last_release.lock().await;

        let mut ready_at = last_release.map(|at| at + self.interval);
        if let Some(penalty) = self.take_not_before() {
            ready_at = Some(ready_at.map_or(penalty, |at| at.max(penalty)));
        }

        if let Some(ready_at) = ready_at {
            let now = Instant::now();
            if ready_at > now {
                let delay = ready_at - now;
                let cumulative = self.add_cumulative_delay(delay);

                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider lowering maxResults"
                    );
                }

                tokio::time::sleep_until(ready_at).await;
            }
        } else {
            debug!("first request - no delay");
        }

        *last_release = Some(Instant::now());
    }

    /// Records a server-mandated delay (from a Retry-After header).
    ///
    /// The next `acquire()` will not return before `delay` has elapsed from now.
    #[instrument(skip(self))]
    pub fn record_rate_limit(&self, delay: Duration) {
        let delay = delay.min(MAX_RETRY_AFTER);
        let until = Instant::now() + delay;
        let mut not_before = self
            .not_before
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *not_before = Some(not_before.map_or(until, |at| at.max(until)));

        debug!(delay_ms = delay.as_millis(), "recorded server rate limit");
    }

    fn take_not_before(&self) -> Option<Instant> {
        self.not_before
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use harvester_core::transport::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                max_secs = MAX_RETRY_AFTER.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    }
}
