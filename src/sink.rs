//! Destinations for flushed record batches.
//!
//! A batch is handed to the sink as a whole; the run controller checkpoints
//! only after `push_batch` returns, so a batch is either durable before its
//! checkpoint or re-fetched on resume.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::record::NormalizedRecord;

/// Errors raised by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the output file failed.
    #[error("failed to write {path}: {source}\n  Suggestion: Check that the output directory exists and is writable")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded.
    #[error("failed to serialize record: {0}")]
    Serialize(String),

    /// The sink no longer accepts records.
    #[error("sink is closed")]
    Closed,
}

impl SinkError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Receives batches of normalized records in emission order.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Durably appends `batch`.
    async fn push_batch(&self, batch: &[NormalizedRecord]) -> Result<(), SinkError>;
}

/// One JSON object per line, each wrapped in the versioned envelope.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
    written: AtomicU64,
}

impl JsonLinesSink {
    /// Creates (or truncates) `path` for a fresh run.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] when the file cannot be created.
    pub async fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path)
            .await
            .map_err(|e| SinkError::io(path, e))?;
        Ok(Self::from_file(path, file))
    }

    /// Opens `path` for appending, creating it if missing (resumed runs).
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] when the file cannot be opened.
    pub async fn append(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| SinkError::io(path, e))?;
        Ok(Self::from_file(path, file))
    }

    fn from_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            file: tokio::sync::Mutex::new(file),
            written: AtomicU64::new(0),
        }
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written through this handle.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

/// Encodes `batch` as newline-terminated envelope lines.
pub(crate) fn encode_batch(batch: &[NormalizedRecord]) -> Result<Vec<u8>, SinkError> {
    let mut buffer = Vec::new();
    for record in batch {
        serde_json::to_writer(&mut buffer, &record.envelope())
            .map_err(|e| SinkError::Serialize(e.to_string()))?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    #[instrument(skip(self, batch), fields(path = %self.path.display(), records = batch.len()))]
    async fn push_batch(&self, batch: &[NormalizedRecord]) -> Result<(), SinkError> {
        let buffer = encode_batch(batch)?;

        let mut file = self.file.lock().await;
        file.write_all(&buffer)
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;
        file.flush().await.map_err(|e| SinkError::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;

        let total = self.written.fetch_add(batch.len() as u64, Ordering::SeqCst) + batch.len() as u64;
        debug!(total, "batch written");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySinkInner {
    batches: Vec<Vec<NormalizedRecord>>,
    fail_after: Option<usize>,
    closed: bool,
}

/// Collects batches in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkInner>>,
}

impl MemorySink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `batches` more batches, then fails every push with [`SinkError::Closed`].
    #[must_use]
    pub fn failing_after(batches: usize) -> Self {
        let sink = Self::default();
        sink.lock().fail_after = Some(batches);
        sink
    }

    /// Rejects every following push.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Batches received so far.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<NormalizedRecord>> {
        self.lock().batches.clone()
    }

    /// All records received, flattened in order.
    #[must_use]
    pub fn records(&self) -> Vec<NormalizedRecord> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemorySinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn push_batch(&self, batch: &[NormalizedRecord]) -> Result<(), SinkError> {
        let mut inner = self.lock();
        let exhausted = inner
            .fail_after
            .is_some_and(|limit| inner.batches.len() >= limit);
        if inner.closed || exhausted {
            return Err(SinkError::Closed);
        }
        inner.batches.push(batch.to_vec());
        Ok(())
    }
}
