//! The `SQLite` state file that holds run checkpoints.
//!
//! Every connection opens in WAL mode with a busy timeout, so a process
//! killed mid-save leaves the previous checkpoint readable. The schema lives
//! in `migrations/` and is applied on open.
//!
//! ```no_run
//! use harvester_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("harvester-state.db")).await?;
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;
use tracing::{debug, instrument};

/// A run has one writer; the second connection serves `--fresh` and reads.
const MAX_CONNECTIONS: u32 = 2;

/// How long a connection waits on a locked state file before `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures opening or migrating the state file.
#[derive(Error, Debug)]
pub enum DbError {
    /// The state file could not be opened or queried.
    #[error("state database error: {0}")]
    Connection(#[from] sqlx::Error),

    /// The checkpoint schema could not be applied.
    #[error("cannot migrate state database: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled handle to the state file. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the state file at `db_path`, creating it if absent, and applies
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when the file cannot be opened,
    /// [`DbError::Migration`] when the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    /// Single-connection in-memory state, for tests.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("checkpoint schema up to date");
        Ok(Self { pool })
    }

    /// The underlying pool, for checkpoint queries.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the state file is in WAL mode.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Waits for in-flight queries, then closes every connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
