//! Harvester Core Library
//!
//! Resumable harvesting of public research and regulatory listings
//! (HuggingFace Hub, arXiv, SEC EDGAR) into a normalized JSON-lines dataset.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Run input, validation and the result budget
//! - [`transport`] - Rate-limited HTTP with retry and backoff
//! - [`source`] - Per-provider page fetching, screening and record mapping
//! - [`paginate`] - Cursor-driven traversal under the result cap
//! - [`record`] - Normalized record types and the output envelope
//! - [`sink`] - Batch destinations (JSON lines, in-memory)
//! - [`checkpoint`] - Durable run state for suspend/resume
//! - [`run`] - The run state machine tying it all together
//! - [`db`] - `SQLite` connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod paginate;
pub mod record;
pub mod run;
pub mod sink;
pub mod source;
pub mod transport;
pub mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use checkpoint::{CheckpointError, CheckpointStore, MemoryCheckpointStore, RunState, SqliteCheckpointStore};
pub use config::{ConfigError, Filters, Mode, RequestBudget, RunConfig, RunInput};
pub use db::Database;
pub use paginate::{PageCursor, StopReason};
pub use record::NormalizedRecord;
pub use run::{RunController, RunError, RunFailure, RunOutcome, RunStatus};
pub use sink::{JsonLinesSink, MemorySink, RecordSink, SinkError};
pub use source::{Source, source_for, source_with_base_url};
pub use transport::{RateLimiter, RetryPolicy, RetryingTransport, TransportError};
pub use user_agent::user_agent;
