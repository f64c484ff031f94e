//! Durable run state for suspend/resume.
//!
//! # Overview
//!
//! - [`RunState`] - Where a run is: cursor, records emitted, filters
//! - [`CheckpointStore`] - Load/save/clear seam used by the run controller
//! - [`SqliteCheckpointStore`] - One row per run id in the state database
//! - [`MemoryCheckpointStore`] - Shared in-memory store with failure injection
//!
//! A checkpoint is written after every batch flush and before every
//! suspension, and cleared when a run completes.

mod error;

pub use error::{CheckpointDbErrorKind, CheckpointError};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{Filters, Mode};
use crate::db::Database;
use crate::paginate::PageCursor;

/// Persisted progress of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    pub mode: Mode,
    /// Resume position: the cursor after the last flushed record.
    pub cursor: PageCursor,
    pub items_emitted: u64,
    /// Unix seconds when the run first started (kept across resumes).
    pub started_at: u64,
    pub filters: Filters,
}

impl RunState {
    /// A fresh state at `cursor` with nothing emitted.
    #[must_use]
    pub fn new(run_id: impl Into<String>, mode: Mode, cursor: PageCursor, filters: Filters) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            cursor,
            items_emitted: 0,
            started_at: unix_now(),
            filters,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Storage for one run's checkpoint.
///
/// This trait uses `async_trait` so the run controller can hold a
/// `&dyn CheckpointStore` and tests can substitute the in-memory store.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored state, if any.
    async fn load(&self) -> Result<Option<RunState>, CheckpointError>;

    /// Replaces the stored state.
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError>;

    /// Removes the stored state. Clearing an absent checkpoint succeeds.
    async fn clear(&self) -> Result<(), CheckpointError>;
}

/// `SQLite`-backed checkpoint store scoped to one run id.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
    run_id: String,
}

impl SqliteCheckpointStore {
    /// Creates a store for `run_id` in `db`.
    #[must_use]
    pub fn new(db: Database, run_id: impl Into<String>) -> Self {
        Self {
            db,
            run_id: run_id.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    async fn load(&self) -> Result<Option<RunState>, CheckpointError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM run_checkpoints WHERE run_id = ?")
                .bind(&self.run_id)
                .fetch_optional(self.db.pool())
                .await?;

        let Some((state_json,)) = row else {
            return Ok(None);
        };
        let state: RunState =
            serde_json::from_str(&state_json).map_err(|e| CheckpointError::Corrupt {
                run_id: self.run_id.clone(),
                reason: e.to_string(),
            })?;
        debug!(cursor = %state.cursor, items_emitted = state.items_emitted, "checkpoint loaded");
        Ok(Some(state))
    }

    #[instrument(skip(self, state), fields(run_id = %self.run_id, cursor = %state.cursor))]
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        let state_json =
            serde_json::to_string(state).map_err(|e| CheckpointError::Serialize(e.to_string()))?;
        let items_emitted = i64::try_from(state.items_emitted).unwrap_or(i64::MAX);

        sqlx::query(
            r"
            INSERT INTO run_checkpoints (run_id, mode, state_json, items_emitted)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                mode = excluded.mode,
                state_json = excluded.state_json,
                items_emitted = excluded.items_emitted,
                updated_at = datetime('now')
            ",
        )
        .bind(&self.run_id)
        .bind(state.mode.as_str())
        .bind(state_json)
        .bind(items_emitted)
        .execute(self.db.pool())
        .await?;

        debug!(items_emitted = state.items_emitted, "checkpoint saved");
        Ok(())
    }

    #[instrument(skip(self), fields(run_id = %self.run_id))]
    async fn clear(&self) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM run_checkpoints WHERE run_id = ?")
            .bind(&self.run_id)
            .execute(self.db.pool())
            .await?;
        debug!("checkpoint cleared");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: Option<RunState>,
    history: Vec<RunState>,
    clears: u32,
    fail_saves: bool,
}

/// In-memory checkpoint store. Clones share the same state, so a test can
/// keep a handle and inspect what a run saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryCheckpointStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `state`.
    #[must_use]
    pub fn with_state(state: RunState) -> Self {
        let store = Self::default();
        store.lock().state = Some(state);
        store
    }

    /// Makes every following `save` fail (or succeed again).
    pub fn fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    /// The currently stored state.
    #[must_use]
    pub fn current(&self) -> Option<RunState> {
        self.lock().state.clone()
    }

    /// Every state successfully saved, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<RunState> {
        self.lock().history.clone()
    }

    /// Number of `clear` calls.
    #[must_use]
    pub fn clears(&self) -> u32 {
        self.lock().clears
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<RunState>, CheckpointError> {
        Ok(self.lock().state.clone())
    }

    async fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        let mut inner = self.lock();
        if inner.fail_saves {
            return Err(CheckpointError::Unavailable("save failure injected".to_string()));
        }
        inner.state = Some(state.clone());
        inner.history.push(state.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        let mut inner = self.lock();
        inner.state = None;
        inner.clears += 1;
        Ok(())
    }
}
