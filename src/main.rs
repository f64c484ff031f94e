//! CLI entry point for the harvester tool.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::{
    CheckpointStore, Database, JsonLinesSink, RateLimiter, RetryPolicy, RetryingTransport,
    RunController, RunInput, RunStatus, SqliteCheckpointStore, source_for, source_with_base_url,
    user_agent,
};
use tracing::{debug, error, info};

mod cli;

use cli::Args;

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    /// The run completed.
    Success,
    /// The run failed; a checkpoint may allow resuming.
    Failure,
    /// The run was interrupted and checkpointed.
    Suspended,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Suspended => 2,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit.code())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs).
    // Usage errors exit 1; exit 2 is reserved for suspended runs.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ProcessExit::Failure.into()
            } else {
                ProcessExit::Success.into()
            };
        }
    };

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match run_harvester(args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            error!("{e:#}");
            ProcessExit::Failure.into()
        }
    }
}

async fn run_harvester(args: Args) -> Result<ProcessExit> {
    let document = match &args.input {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read input file {}", path.display()))?;
            RunInput::from_json(&text)?
        }
        None => RunInput::default(),
    };
    let mut config = document.overlay(args.overrides()).validate()?;
    if let Some(run_id) = &args.run_id {
        config = config.with_run_id(run_id.trim());
    }

    info!(
        mode = %config.mode,
        run_id = %config.run_id,
        max_results = config.max_results,
        output = %args.output.display(),
        "Harvester starting"
    );

    let rate_limiter = Arc::new(RateLimiter::new(config.request_interval));
    let transport = RetryingTransport::new(
        &user_agent(config.contact.as_deref()),
        config.timeout,
        RetryPolicy::with_max_attempts(config.max_retries),
        rate_limiter,
    )?;
    let source = match &args.base_url {
        Some(base_url) => source_with_base_url(config.mode, base_url),
        None => source_for(config.mode),
    };

    let db = Database::new(&args.db)
        .await
        .with_context(|| format!("cannot open state database {}", args.db.display()))?;
    let store = SqliteCheckpointStore::new(db.clone(), config.run_id.clone());
    if args.fresh {
        store.clear().await?;
        info!(run_id = %config.run_id, "discarded stored checkpoint");
    }

    // A stored checkpoint means earlier records are already in the dataset.
    // An unreadable one must abort before the sink can truncate them.
    let resuming = store
        .load()
        .await
        .with_context(|| format!("cannot resume run {}", config.run_id))?
        .is_some();
    let sink = if resuming {
        JsonLinesSink::append(&args.output).await?
    } else {
        JsonLinesSink::create(&args.output).await?
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let result = RunController::new(&config, source.as_ref(), &transport, &store, &sink)
        .with_cancel_flag(interrupted)
        .run()
        .await;

    let stats = transport.stats();
    debug!(attempts = stats.attempts(), retries = stats.retries(), "transport totals");
    db.close().await;

    match result {
        Ok(outcome) if outcome.status == RunStatus::Suspended => {
            info!(
                emitted = outcome.emitted,
                cursor = %outcome.final_cursor,
                run_id = %outcome.run_id,
                "Interrupted. Run again with the same arguments to resume."
            );
            Ok(ProcessExit::Suspended)
        }
        Ok(outcome) => {
            info!(
                emitted = outcome.emitted,
                written = sink.written(),
                output = %sink.path().display(),
                "Harvest complete"
            );
            Ok(ProcessExit::Success)
        }
        Err(failure) => {
            error!("{:#}", anyhow::Error::new(failure.error));
            if let Some(state) = failure.last_state {
                error!(
                    items_emitted = state.items_emitted,
                    cursor = %state.cursor,
                    run_id = %state.run_id,
                    "Run failed. Re-run with the same arguments to resume from the last checkpoint."
                );
            }
            Ok(ProcessExit::Failure)
        }
    }
}
