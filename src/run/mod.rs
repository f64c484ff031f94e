//! The run state machine.
//!
//! ```text
//! INIT -> FETCHING -> MAPPING -> FLUSHING -> CHECKPOINTING -> FETCHING ... -> DONE
//!           \______________________________________________________________-> FAILED
//! ```
//!
//! [`RunController`] owns the [`RunState`]: it loads or creates it, advances
//! it as batches are flushed, persists it after every flush and before a
//! suspension, and clears it when the run completes. Checkpoint write
//! failures are logged and counted, never fatal; the next successful write
//! supersedes them.

mod error;

pub use error::{RunError, RunFailure};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::checkpoint::{CheckpointStore, RunState};
use crate::config::{RequestBudget, RunConfig};
use crate::paginate::{PageCursor, Paginator, StopReason};
use crate::record::NormalizedRecord;
use crate::sink::RecordSink;
use crate::source::Source;
use crate::transport::RetryingTransport;

/// Controller phases, logged at debug level on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Fetching,
    Mapping,
    Flushing,
    Checkpointing,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::Mapping => "mapping",
            Self::Flushing => "flushing",
            Self::Checkpointing => "checkpointing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// How a run ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Traversal finished; the checkpoint was cleared.
    Completed,
    /// Cancellation was requested; the checkpoint was left for resume.
    Suspended,
}

/// Summary of a finished or suspended run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub run_id: String,
    /// Whether this session resumed a stored checkpoint.
    pub resumed: bool,
    /// Records emitted over the whole run, earlier sessions included.
    pub emitted: u64,
    /// Records emitted by this session.
    pub emitted_this_session: u64,
    pub final_cursor: PageCursor,
    pub pages_fetched: u64,
    /// Sizes of the batches flushed by this session, in order.
    pub batches: Vec<usize>,
    pub checkpoint_writes: u64,
    pub checkpoint_failures: u64,
    pub mapping_failures: u64,
    /// Items dropped by source screening.
    pub screened_out: u64,
    pub stop_reason: Option<StopReason>,
    /// The free-tier ceiling is what ended the run.
    pub free_tier_capped: bool,
}

/// Session counters, folded into [`RunOutcome`] at the end.
#[derive(Debug, Default)]
struct Counters {
    pages_fetched: u64,
    batches: Vec<usize>,
    checkpoint_writes: u64,
    checkpoint_failures: u64,
    mapping_failures: u64,
    screened_out: u64,
    emitted_this_session: u64,
}

/// A mapped record waiting for its batch, with the cursor resuming after it.
struct Buffered {
    record: NormalizedRecord,
    resume_at: PageCursor,
}

/// Drives one run from INIT to DONE.
pub struct RunController<'a> {
    config: &'a RunConfig,
    source: &'a dyn Source,
    transport: &'a RetryingTransport,
    store: &'a dyn CheckpointStore,
    sink: &'a dyn RecordSink,
    cancel: Arc<AtomicBool>,
}

impl<'a> RunController<'a> {
    /// Creates a controller. Nothing happens until [`RunController::run`].
    #[must_use]
    pub fn new(
        config: &'a RunConfig,
        source: &'a dyn Source,
        transport: &'a RetryingTransport,
        store: &'a dyn CheckpointStore,
        sink: &'a dyn RecordSink,
    ) -> Self {
        Self {
            config,
            source,
            transport,
            store,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `flag` as the cancellation signal; it is checked between pages.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Runs to completion, suspension or failure.
    ///
    /// # Errors
    ///
    /// Returns [`RunFailure`] when configuration, checkpoint loading, a page
    /// request or the sink fails. Buffered records that were not flushed are
    /// not counted; the last saved checkpoint still points before them.
    #[instrument(skip(self), fields(run_id = %self.config.run_id, mode = %self.config.mode))]
    pub async fn run(&self) -> Result<RunOutcome, RunFailure> {
        let mut phase = RunPhase::Init;
        transition(&mut phase, RunPhase::Init);

        let budget = RequestBudget::new(
            self.config.max_results,
            self.source.page_size(),
            self.config.free_tier,
        )
        .map_err(|e| fail(&mut phase, e, None))?;

        let (mut state, resumed) = self
            .initial_state()
            .await
            .map_err(|e| fail(&mut phase, e, None))?;

        info!(
            cap = budget.effective_cap(),
            resumed,
            cursor = %state.cursor,
            items_emitted = state.items_emitted,
            "run started"
        );

        let paginator = Paginator::new(self.source, self.transport, budget);
        let cap = budget.effective_cap();
        let mut counters = Counters::default();
        let mut buffer: Vec<Buffered> = Vec::new();
        let mut cursor = state.cursor.clone();

        let (stop_reason, final_position) = loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!(cursor = %state.cursor, "cancellation requested; suspending");
                if !buffer.is_empty() {
                    debug!(dropped = buffer.len(), "unflushed records will be re-fetched on resume");
                }
                self.checkpoint(&mut phase, &state, &mut counters).await;
                return Ok(self.outcome(RunStatus::Suspended, resumed, &state, counters, None, &budget));
            }

            transition(&mut phase, RunPhase::Fetching);
            let produced = state.items_emitted + buffer.len() as u64;
            let page = match paginator.next_page(&cursor, produced, &self.config.filters).await {
                Ok(page) => page,
                Err(e) => return Err(fail(&mut phase, e, Some(state))),
            };
            if page.fetched {
                counters.pages_fetched += 1;
            }
            counters.screened_out += page.skipped as u64;

            transition(&mut phase, RunPhase::Mapping);
            for paged in page.items {
                match self.source.map(&paged.item) {
                    Ok(record) => buffer.push(Buffered {
                        record,
                        resume_at: paged.resume_at,
                    }),
                    Err(e) => {
                        counters.mapping_failures += 1;
                        warn!(error = %e, resume_at = %paged.resume_at, "dropping unmappable item");
                    }
                }
            }

            while buffer.len() >= self.config.batch_size.max(1) {
                let batch: Vec<Buffered> = buffer.drain(..self.config.batch_size.max(1)).collect();
                if let Err(e) = self.flush(&mut phase, batch, &mut state, &mut counters).await {
                    return Err(fail(&mut phase, e, Some(state)));
                }
                self.checkpoint(&mut phase, &state, &mut counters).await;
            }

            // Nothing pending: progress through skipped or unmappable items is
            // safe to record.
            if buffer.is_empty() && page.position != state.cursor {
                state.cursor = page.position.clone();
                self.checkpoint(&mut phase, &state, &mut counters).await;
            }

            match page.next {
                Some(next) => cursor = next,
                None => {
                    let produced = state.items_emitted + buffer.len() as u64;
                    // Items dropped by mapping still counted toward the page
                    // truncation; top up from where the page stopped.
                    if page.stop == Some(StopReason::CapReached) && page.fetched && produced < cap {
                        debug!(produced, cap, "cap page lost items to mapping; continuing");
                        cursor = page.position;
                        continue;
                    }
                    break (page.stop, page.position);
                }
            }
        };

        if !buffer.is_empty() {
            let batch = std::mem::take(&mut buffer);
            if let Err(e) = self.flush(&mut phase, batch, &mut state, &mut counters).await {
                return Err(fail(&mut phase, e, Some(state)));
            }
        }
        state.cursor = final_position;
        self.checkpoint(&mut phase, &state, &mut counters).await;

        transition(&mut phase, RunPhase::Done);
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear checkpoint after completion");
        }

        let outcome = self.outcome(RunStatus::Completed, resumed, &state, counters, stop_reason, &budget);
        info!(
            emitted = outcome.emitted,
            emitted_this_session = outcome.emitted_this_session,
            pages_fetched = outcome.pages_fetched,
            batches = outcome.batches.len(),
            checkpoint_writes = outcome.checkpoint_writes,
            checkpoint_failures = outcome.checkpoint_failures,
            mapping_failures = outcome.mapping_failures,
            stop_reason = outcome.stop_reason.map_or("none", |reason| reason.as_str()),
            "run complete"
        );
        if outcome.free_tier_capped {
            info!(
                cap = budget.effective_cap(),
                requested = budget.max_results(),
                "free tier limited this run; provide a contact to lift the cap"
            );
        }
        Ok(outcome)
    }

    /// Loads the stored state for this run id, or starts a fresh one.
    async fn initial_state(&self) -> Result<(RunState, bool), RunError> {
        match self.store.load().await? {
            Some(stored)
                if stored.mode == self.config.mode && stored.filters == self.config.filters =>
            {
                info!(cursor = %stored.cursor, items_emitted = stored.items_emitted, "resuming from checkpoint");
                Ok((stored, true))
            }
            Some(stored) => Err(RunError::CheckpointMismatch {
                run_id: self.config.run_id.clone(),
                stored_mode: stored.mode,
                mode: self.config.mode,
            }),
            None => Ok((
                RunState::new(
                    self.config.run_id.clone(),
                    self.config.mode,
                    self.source.initial_cursor(),
                    self.config.filters.clone(),
                ),
                false,
            )),
        }
    }

    async fn flush(
        &self,
        phase: &mut RunPhase,
        batch: Vec<Buffered>,
        state: &mut RunState,
        counters: &mut Counters,
    ) -> Result<(), RunError> {
        let Some(resume_at) = batch.last().map(|b| b.resume_at.clone()) else {
            return Ok(());
        };
        transition(phase, RunPhase::Flushing);

        let records: Vec<NormalizedRecord> = batch.into_iter().map(|b| b.record).collect();
        self.sink.push_batch(&records).await?;

        let flushed = records.len() as u64;
        state.items_emitted += flushed;
        state.cursor = resume_at;
        counters.emitted_this_session += flushed;
        counters.batches.push(records.len());
        debug!(flushed, items_emitted = state.items_emitted, cursor = %state.cursor, "batch flushed");
        Ok(())
    }

    async fn checkpoint(&self, phase: &mut RunPhase, state: &RunState, counters: &mut Counters) {
        transition(phase, RunPhase::Checkpointing);
        match self.store.save(state).await {
            Ok(()) => counters.checkpoint_writes += 1,
            Err(e) => {
                counters.checkpoint_failures += 1;
                warn!(error = %e, cursor = %state.cursor, "checkpoint write failed; continuing");
            }
        }
    }

    fn outcome(
        &self,
        status: RunStatus,
        resumed: bool,
        state: &RunState,
        counters: Counters,
        stop_reason: Option<StopReason>,
        budget: &RequestBudget,
    ) -> RunOutcome {
        RunOutcome {
            status,
            run_id: self.config.run_id.clone(),
            resumed,
            emitted: state.items_emitted,
            emitted_this_session: counters.emitted_this_session,
            final_cursor: state.cursor.clone(),
            pages_fetched: counters.pages_fetched,
            batches: counters.batches,
            checkpoint_writes: counters.checkpoint_writes,
            checkpoint_failures: counters.checkpoint_failures,
            mapping_failures: counters.mapping_failures,
            screened_out: counters.screened_out,
            stop_reason,
            free_tier_capped: budget.free_tier_binding()
                && stop_reason == Some(StopReason::CapReached),
        }
    }
}

fn fail(
    phase: &mut RunPhase,
    error: impl Into<RunError>,
    last_state: Option<RunState>,
) -> RunFailure {
    transition(phase, RunPhase::Failed);
    let failure = RunFailure::new(error, last_state);
    warn!(error = %failure.error, "run failed");
    failure
}

fn transition(phase: &mut RunPhase, next: RunPhase) {
    debug!(from = %phase, to = %next, "phase");
    *phase = next;
}
