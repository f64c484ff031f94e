//! Run-level failures.

use thiserror::Error;

use crate::checkpoint::{CheckpointError, RunState};
use crate::config::{ConfigError, Mode};
use crate::sink::SinkError;
use crate::transport::TransportError;

/// Why a run failed.
#[derive(Debug, Error)]
pub enum RunError {
    /// The configuration was rejected at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A page request failed after retries, or was rejected.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The sink refused a batch.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The stored checkpoint could not be read.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The stored checkpoint belongs to a run with different parameters.
    #[error(
        "checkpoint for run {run_id} was written by a {stored_mode} run with different filters than this {mode} run\n  Suggestion: Re-run with --fresh to discard it, or pass a different --run-id"
    )]
    CheckpointMismatch {
        /// Run id whose checkpoint conflicts.
        run_id: String,
        /// Mode recorded in the checkpoint.
        stored_mode: Mode,
        /// Mode of the current run.
        mode: Mode,
    },
}

/// A failed run, with the last checkpointed state for diagnostics.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: RunError,
    /// Last state persisted (or that would have been); `None` if the run
    /// failed before a state existed.
    pub last_state: Option<RunState>,
}

impl RunFailure {
    pub(crate) fn new(error: impl Into<RunError>, last_state: Option<RunState>) -> Self {
        Self {
            error: error.into(),
            last_state,
        }
    }
}
