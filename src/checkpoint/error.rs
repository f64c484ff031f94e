//! Error types for checkpoint persistence.

use std::fmt;

use thiserror::Error;

use crate::db::DbError;

/// Structured classification for checkpoint database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// Unclassified database failure.
    Other,
}

impl CheckpointDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for CheckpointDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> CheckpointDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return CheckpointDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return CheckpointDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return CheckpointDbErrorKind::BusyOrLocked;
    }

    CheckpointDbErrorKind::Other
}

/// Errors that can occur while loading, saving or clearing a checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Database operation failed.
    #[error("checkpoint database error ({kind}): {message}")]
    Database {
        /// Typed classification of the failure.
        kind: CheckpointDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// The run state could not be encoded.
    #[error("failed to serialize run state: {0}")]
    Serialize(String),

    /// A stored checkpoint could not be decoded.
    #[error(
        "checkpoint for run {run_id} is unreadable: {reason}\n  Suggestion: Re-run with --fresh to discard it"
    )]
    Corrupt {
        /// Run whose checkpoint is unreadable.
        run_id: String,
        /// Decoder message.
        reason: String,
    },

    /// The state database could not be opened or migrated.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Injected failure from the in-memory store.
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for CheckpointError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: CheckpointDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl CheckpointError {
    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<CheckpointDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_error_database_message() {
        let err = CheckpointError::Database {
            kind: CheckpointDbErrorKind::BusyOrLocked,
            message: "database is locked".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("busy_or_locked"));
        assert!(msg.contains("database is locked"));
        assert_eq!(err.database_kind(), Some(CheckpointDbErrorKind::BusyOrLocked));
    }

    #[test]
    fn test_checkpoint_error_from_pool_closed() {
        let err = CheckpointError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.database_kind(), Some(CheckpointDbErrorKind::PoolClosed));
    }

    #[test]
    fn test_corrupt_checkpoint_suggests_fresh() {
        let err = CheckpointError::Corrupt {
            run_id: "abc".to_string(),
            reason: "expected value".to_string(),
        };
        assert!(err.to_string().contains("--fresh"));
        assert_eq!(err.database_kind(), None);
    }
}
