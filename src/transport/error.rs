//! Error types for the transport module.
//!
//! Two layers of errors exist here:
//! - [`AttemptError`] describes why a *single* attempt failed. It never leaves
//!   the retry loop; it is classified into a [`FailureType`](super::FailureType)
//!   to decide whether another attempt is made.
//! - [`TransportError`] is what a caller of
//!   [`RetryingTransport::send`](super::RetryingTransport::send) sees once the
//!   logical request has succeeded or definitively failed.

use thiserror::Error;

use super::constants::BODY_SNIPPET_CHARS;

/// Failure of a single HTTP attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The attempt did not complete within the per-attempt timeout.
    #[error("timeout after {timeout_secs}s requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// Configured per-attempt timeout.
        timeout_secs: u64,
    },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429/503 responses).
        retry_after: Option<String>,
        /// Leading part of the response body.
        body: String,
    },
}

impl AttemptError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            url: url.into(),
            timeout_secs,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
            body: String::new(),
        }
    }

    /// Creates an HTTP status error carrying the Retry-After header and a body snippet.
    pub fn http_status_with_details(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
        body: &str,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
            body: snippet(body),
        }
    }
}

/// Errors surfaced by [`RetryingTransport`](super::RetryingTransport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote rejected the request with a non-retryable status (4xx other than 429).
    #[error("[CLIENT] HTTP {status} from {url} (not retried)\n  Suggestion: {suggestion}")]
    Client {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Leading part of the response body.
        body: String,
        /// User-facing hint for resolving the rejection.
        suggestion: &'static str,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("request to {url} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Requested URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Display text of the last attempt failure.
        last_error: String,
    },

    /// A network failure that retrying cannot fix (TLS/certificate problems).
    #[error("connection to {url} failed permanently: {reason}")]
    Connection {
        /// Requested URL.
        url: String,
        /// Display text of the underlying failure.
        reason: String,
    },

    /// The request could not be built.
    #[error("invalid request URL {url}: {reason}")]
    InvalidRequest {
        /// The offending URL.
        url: String,
        /// Why it is invalid.
        reason: String,
    },

    /// A successful response could not be decoded into the expected shape.
    #[error("failed to decode response from {url}: {reason}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Parser error text.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("HTTP client construction failed: {reason}")]
    Build {
        /// Builder error text.
        reason: String,
    },
}

impl TransportError {
    /// Creates a client (non-retryable status) error with a status-specific suggestion.
    pub fn client(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let suggestion = match status {
            401 | 403 => {
                "Set a contact (--contact) so the User-Agent identifies you; anonymous traffic is rejected by some providers."
            }
            404 => "Check the identifier (CIK, model id, category) - the resource does not exist.",
            400 | 422 => "Check the query and filter values for this mode.",
            _ => "The provider rejected the request; retrying will not help.",
        };
        Self::Client {
            url: url.into(),
            status,
            body: body.into(),
            suggestion,
        }
    }

    /// Creates a retries-exhausted error.
    pub fn exhausted(url: impl Into<String>, attempts: u32, last_error: &AttemptError) -> Self {
        Self::Exhausted {
            url: url.into(),
            attempts,
            last_error: last_error.to_string(),
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the HTTP status for client errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true when the error means retries were exhausted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}
