//! Execution adapter between a started job and the simulation engine.
//!
//! Each started job gets one task that:
//! 1. Builds the progress callback and optional timeout for the job
//! 2. Runs the engine, catching panics as failures
//! 3. Maps the outcome onto the job record
//! 4. Writes the result artifact for completed and failed jobs
//! 5. Releases the slot via `on_job_finished`

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::scheduler::BacktestScheduler;
use crate::application::ports::{EngineConfig, EngineError, ProgressCallback};
use crate::domain::job::{BacktestResult, JobId};

/// A job that has just taken a slot.
#[derive(Debug)]
pub(crate) struct Launch {
    pub(crate) id: JobId,
    pub(crate) config: EngineConfig,
    pub(crate) cancel: CancellationToken,
}

/// Engine outcome as seen by the scheduler.
#[derive(Debug)]
pub(crate) enum ExecutionOutcome {
    Completed(Box<BacktestResult>),
    Failed(String),
    Cancelled,
}

impl From<Result<BacktestResult, EngineError>> for ExecutionOutcome {
    fn from(result: Result<BacktestResult, EngineError>) -> Self {
        match result {
            Ok(result) => Self::Completed(Box::new(result)),
            Err(EngineError::Failed { message }) => Self::Failed(message),
            Err(EngineError::Cancelled) => Self::Cancelled,
        }
    }
}

/// Spawn the execution task for a started job.
pub(crate) fn spawn(scheduler: Arc<BacktestScheduler>, launch: Launch) -> JoinHandle<()> {
    let span = tracing::info_span!("backtest", job_id = %launch.id);
    tokio::spawn(execute(scheduler, launch).instrument(span))
}

async fn execute(scheduler: Arc<BacktestScheduler>, launch: Launch) {
    let Launch { id, config, cancel } = launch;
    let engine = scheduler.engine();

    let done = CancellationToken::new();
    let _disarm = done.clone().drop_guard();
    if let Some(limit) = scheduler.settings().job_timeout {
        arm_timeout(Arc::clone(&scheduler), id.clone(), limit, done);
    }

    let progress: ProgressCallback = {
        let scheduler = Arc::clone(&scheduler);
        let id = id.clone();
        let cancel = cancel.clone();
        Arc::new(move |percent: f64| {
            if !cancel.is_cancelled() {
                scheduler.apply_progress(&id, percent);
            }
        })
    };

    tracing::info!(engine = engine.name(), symbols = ?config.symbols, "Engine started");

    let result = AssertUnwindSafe(engine.run(config, progress, cancel.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(EngineError::failed(panic_message(panic.as_ref()))));

    if let Some(record) = scheduler.finish(&id, ExecutionOutcome::from(result)) {
        scheduler.write_artifact(&record);
    }
    scheduler.on_job_finished(&id);
}

/// Cancel the job through the normal cancel path if it is still running
/// after `limit`. The timer is disarmed when `done` fires.
fn arm_timeout(scheduler: Arc<BacktestScheduler>, id: JobId, limit: Duration, done: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = done.cancelled() => {}
            () = tokio::time::sleep(limit) => {
                tracing::warn!(job_id = %id, timeout_secs = limit.as_secs(), "Backtest timed out");
                if let Err(e) = scheduler.cancel(&id) {
                    tracing::debug!(job_id = %id, error = %e, "Timeout cancel skipped");
                }
            }
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(
            || "simulation engine panicked".to_string(),
            |msg| format!("simulation engine panicked: {msg}"),
        )
}
