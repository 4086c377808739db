//! Admission control for backtest jobs.
//!
//! The scheduler owns the job registry and the execution slots. Both live
//! behind one `RwLock`. A mutation takes the write lock, publishes its job
//! event, then downgrades to a read lock to persist the trimmed index. The
//! next writer cannot start until that save returns, so saves are issued in
//! mutation order, while point reads, list reads, and streams proceed
//! during the disk write.
//!
//! # Slots
//!
//! A slot is held from the moment a job starts until its execution task
//! calls [`BacktestScheduler::on_job_finished`]. Cancelling a running job
//! flips its status right away but leaves the slot occupied until the
//! engine has actually wound down, so the number of slots (and therefore
//! the number of `running` records) never exceeds `max_concurrent`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::executor::{self, ExecutionOutcome, Launch};
use super::recovery::{RecoveryReport, recover};
use crate::application::ports::{EngineConfig, JobStore, SimulationEngine};
use crate::domain::job::{
    BacktestConfig, BacktestConfigError, BacktestRequest, JobId, JobRecord, JobStatus,
};
use crate::domain::registry::{JobRegistry, RegistryError, StatusCounts};
use crate::infrastructure::broadcast::{JobEvent, JobEventKind, SharedJobEventHub};
use crate::infrastructure::metrics::{self, StoreOperation};

// =============================================================================
// Settings
// =============================================================================

/// Scheduler limits.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Maximum simultaneously running jobs.
    pub max_concurrent: usize,
    /// Number of newest jobs kept in the persisted index.
    pub history_limit: usize,
    /// Run time after which a job is cancelled. `None` disables.
    pub job_timeout: Option<Duration>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            history_limit: 50,
            job_timeout: None,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Returned by [`BacktestScheduler::submit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    /// New job id.
    pub id: JobId,
    /// `running` or `queued`.
    pub status: JobStatus,
    /// Normalized configuration.
    pub config: BacktestConfig,
    /// 1-based position in the queue when queued.
    pub queue_position: Option<usize>,
}

/// Returned by [`BacktestScheduler::cancel`] and [`BacktestScheduler::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was active and is now cancelled.
    Cancelled {
        /// Status before cancellation.
        previous: JobStatus,
    },
    /// The job was already terminal; nothing changed.
    AlreadyFinished(JobStatus),
}

/// All jobs plus aggregate counts, read under one lock.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// Records, newest first.
    pub jobs: Vec<JobRecord>,
    /// Counts by status.
    pub counts: StatusCounts,
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug)]
struct Slot {
    cancel: CancellationToken,
    started: Instant,
}

#[derive(Debug)]
struct SchedulerState {
    registry: JobRegistry,
    slots: HashMap<JobId, Slot>,
    accepting: bool,
}

/// Admission controller, registry owner, and persistence trigger.
pub struct BacktestScheduler {
    state: RwLock<SchedulerState>,
    store: Arc<dyn JobStore>,
    engine: Arc<dyn SimulationEngine>,
    events: SharedJobEventHub,
    settings: SchedulerSettings,
    root_cancel: CancellationToken,
    slot_count: watch::Sender<usize>,
}

impl std::fmt::Debug for BacktestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestScheduler")
            .field("settings", &self.settings)
            .field("store", &self.store.name())
            .field("engine", &self.engine.name())
            .finish_non_exhaustive()
    }
}

impl BacktestScheduler {
    /// Create a scheduler, loading and reconciling persisted jobs.
    ///
    /// If recovery rewrote any orphaned job the index is saved right away.
    #[must_use]
    pub fn new(
        settings: SchedulerSettings,
        store: Arc<dyn JobStore>,
        engine: Arc<dyn SimulationEngine>,
        events: SharedJobEventHub,
    ) -> (Arc<Self>, RecoveryReport) {
        let (registry, report) = recover(store.as_ref(), Utc::now());
        let settings = SchedulerSettings {
            max_concurrent: settings.max_concurrent.max(1),
            history_limit: settings.history_limit.max(1),
            ..settings
        };

        let scheduler = Arc::new(Self {
            state: RwLock::new(SchedulerState {
                registry,
                slots: HashMap::new(),
                accepting: true,
            }),
            store,
            engine,
            events,
            settings,
            root_cancel: CancellationToken::new(),
            slot_count: watch::Sender::new(0),
        });

        {
            let state = scheduler.state.read();
            if report.needs_save() {
                scheduler.persist(&state);
            } else {
                scheduler.update_gauges(&state);
            }
        }

        (scheduler, report)
    }

    /// Scheduler limits in effect.
    #[must_use]
    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Job event hub the scheduler publishes to.
    #[must_use]
    pub fn events(&self) -> SharedJobEventHub {
        Arc::clone(&self.events)
    }

    pub(crate) fn engine(&self) -> Arc<dyn SimulationEngine> {
        Arc::clone(&self.engine)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Validate a request and admit the job, starting it if a slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Validation`] for a bad request and
    /// [`SchedulerError::ShuttingDown`] once shutdown has begun. Neither
    /// creates a job.
    pub fn submit(self: &Arc<Self>, request: BacktestRequest) -> Result<SubmitReceipt, SchedulerError> {
        let config = request.normalize(Utc::now())?;

        let (receipt, launch) = {
            let mut state = self.state.write();
            if !state.accepting {
                return Err(SchedulerError::ShuttingDown);
            }

            let id = JobId::generate();
            let record = JobRecord::new(id.clone(), config.clone(), Utc::now());
            state.registry.insert(record)?;
            metrics::record_job_submitted();

            let launch = if state.slots.len() < self.settings.max_concurrent {
                self.start_locked(&mut state, &id)
            } else {
                None
            };

            let (status, queue_position) = if launch.is_some() {
                (JobStatus::Running, None)
            } else {
                let position = state
                    .registry
                    .queued_fifo()
                    .iter()
                    .position(|queued| *queued == id)
                    .map(|p| p + 1);
                if let Ok(record) = state.registry.get(&id) {
                    self.emit(record, JobEventKind::Submitted);
                }
                (JobStatus::Queued, position)
            };

            let state = RwLockWriteGuard::downgrade(state);
            self.persist(&state);
            tracing::info!(
                job_id = %id,
                status = %status,
                symbols = ?config.symbols,
                days = config.days,
                running = state.slots.len(),
                "Backtest submitted"
            );

            (
                SubmitReceipt {
                    id,
                    status,
                    config,
                    queue_position,
                },
                launch,
            )
        };

        if let Some(launch) = launch {
            executor::spawn(Arc::clone(self), launch);
        }
        Ok(receipt)
    }

    /// Release the slot held by `id` and promote queued jobs into free
    /// slots, oldest first.
    ///
    /// Called by the execution task once the engine has returned. Calling
    /// it for a job that holds no slot only runs promotion.
    pub fn on_job_finished(self: &Arc<Self>, id: &JobId) {
        let launches = {
            let mut state = self.state.write();
            if state.slots.remove(id).is_some() {
                tracing::debug!(job_id = %id, running = state.slots.len(), "Slot released");
            }

            let mut launches = Vec::new();
            if state.accepting {
                for queued in state.registry.queued_fifo() {
                    if state.slots.len() >= self.settings.max_concurrent {
                        break;
                    }
                    if let Some(launch) = self.start_locked(&mut state, &queued) {
                        tracing::info!(job_id = %queued, "Queued backtest promoted");
                        launches.push(launch);
                    }
                }
            }

            self.slot_count.send_replace(state.slots.len());
            let state = RwLockWriteGuard::downgrade(state);
            self.persist(&state);
            launches
        };

        for launch in launches {
            executor::spawn(Arc::clone(self), launch);
        }
    }

    fn start_locked(&self, state: &mut SchedulerState, id: &JobId) -> Option<Launch> {
        let now = Utc::now();
        let started = state.registry.update(id, |record| {
            record
                .start(now)
                .map(|()| (EngineConfig::from(&record.config), record.clone()))
        });

        match started {
            Ok(Ok((config, record))) => {
                let cancel = self.root_cancel.child_token();
                state.slots.insert(
                    id.clone(),
                    Slot {
                        cancel: cancel.clone(),
                        started: Instant::now(),
                    },
                );
                self.slot_count.send_replace(state.slots.len());
                self.emit(&record, JobEventKind::Started);
                Some(Launch {
                    id: id.clone(),
                    config,
                    cancel,
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Skipped job start");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Job vanished before start");
                None
            }
        }
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancel a job without removing it.
    ///
    /// A queued job is cancelled on the spot. A running job is marked
    /// cancelled and its engine is signalled; its slot is released once
    /// the engine returns. Cancelling a terminal job is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if the id is unknown.
    pub fn cancel(&self, id: &JobId) -> Result<CancelOutcome, SchedulerError> {
        let mut state = self.state.write();
        let outcome = self.cancel_locked(&mut state, id)?;
        if matches!(outcome, CancelOutcome::Cancelled { .. }) {
            let state = RwLockWriteGuard::downgrade(state);
            self.persist(&state);
        }
        Ok(outcome)
    }

    /// Cancel a job if it is still active, then remove it from the
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if the id is unknown.
    pub fn delete(&self, id: &JobId) -> Result<CancelOutcome, SchedulerError> {
        let mut state = self.state.write();
        let outcome = self.cancel_locked(&mut state, id)?;
        let removed = state.registry.remove(id)?;
        self.emit(&removed, JobEventKind::Removed);
        let state = RwLockWriteGuard::downgrade(state);
        self.persist(&state);
        tracing::info!(job_id = %id, status = %removed.status, "Backtest deleted");
        Ok(outcome)
    }

    fn cancel_locked(
        &self,
        state: &mut SchedulerState,
        id: &JobId,
    ) -> Result<CancelOutcome, SchedulerError> {
        let status = state.registry.get(id)?.status;
        if status.is_terminal() {
            tracing::debug!(job_id = %id, status = %status, "Cancel ignored, job already finished");
            return Ok(CancelOutcome::AlreadyFinished(status));
        }

        let now = Utc::now();
        let (previous, record) = state
            .registry
            .update(id, |record| record.cancel(now).map(|p| (p, record.clone())))?
            .map_err(|e| SchedulerError::Internal(e.to_string()))?;

        if let Some(slot) = state.slots.get(id) {
            slot.cancel.cancel();
        }

        metrics::record_job_finished(JobStatus::Cancelled);
        self.emit(&record, JobEventKind::Finished);
        tracing::info!(job_id = %id, previous = %previous, "Backtest cancelled");
        Ok(CancelOutcome::Cancelled { previous })
    }

    // =========================================================================
    // Execution Callbacks
    // =========================================================================

    /// Apply an engine progress report.
    pub(crate) fn apply_progress(&self, id: &JobId, percent: f64) {
        let mut state = self.state.write();
        let changed = state
            .registry
            .update(id, |record| record.record_progress(percent).then(|| record.clone()));
        if let Ok(Some(record)) = changed {
            tracing::trace!(job_id = %id, progress = record.progress, "Progress");
            self.emit(&record, JobEventKind::Progress);
            let state = RwLockWriteGuard::downgrade(state);
            self.persist(&state);
        }
    }

    /// Record the engine outcome. Returns the record when it finished as
    /// completed or failed, for artifact writing.
    pub(crate) fn finish(&self, id: &JobId, outcome: ExecutionOutcome) -> Option<JobRecord> {
        let mut state = self.state.write();
        let now = Utc::now();
        let held_for = state.slots.get(id).map(|slot| slot.started.elapsed());

        let Ok(status) = state.registry.get(id).map(|r| r.status) else {
            tracing::debug!(job_id = %id, "Job removed before its execution finished");
            return None;
        };

        let applied = state.registry.update(id, |record| {
            let changed = match (status, outcome) {
                (JobStatus::Running, ExecutionOutcome::Completed(result)) => {
                    record.complete(*result, now).is_ok()
                }
                (JobStatus::Running, ExecutionOutcome::Failed(message)) => {
                    tracing::warn!(job_id = %record.id, error = %message, "Backtest failed");
                    record.fail(message, now).is_ok()
                }
                (JobStatus::Running, ExecutionOutcome::Cancelled) => {
                    record.cancel(now).is_ok() && record.mark_finished(now)
                }
                _ => record.mark_finished(now),
            };
            (changed, record.clone())
        });

        let Ok((changed, record)) = applied else {
            return None;
        };

        if status == JobStatus::Running {
            metrics::record_job_finished(record.status);
        }
        if let Some(elapsed) = held_for {
            metrics::record_job_duration(record.status, elapsed);
        }
        if changed {
            self.emit(&record, JobEventKind::Finished);
            let state = RwLockWriteGuard::downgrade(state);
            self.persist(&state);
        }
        tracing::info!(
            job_id = %id,
            status = %record.status,
            elapsed_ms = held_for.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            "Backtest finished"
        );

        matches!(record.status, JobStatus::Completed | JobStatus::Failed)
            .then_some(record)
    }

    /// Write the long-term artifact for a finished job. Failures are
    /// logged and dropped.
    pub(crate) fn write_artifact(&self, record: &JobRecord) {
        if let Err(e) = self.store.write_artifact(record) {
            tracing::error!(
                job_id = %record.id,
                error = %e,
                store = self.store.name(),
                "Failed to write result artifact"
            );
            metrics::record_persistence_failure(StoreOperation::Artifact);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Point read.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if the id is unknown.
    pub fn get(&self, id: &JobId) -> Result<JobRecord, SchedulerError> {
        Ok(self.state.read().registry.get(id)?.clone())
    }

    /// All records, newest first, with counts.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.read();
        JobSnapshot {
            jobs: state.registry.snapshot(),
            counts: state.registry.counts(),
        }
    }

    /// Counts by status.
    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        self.state.read().registry.counts()
    }

    /// Number of occupied execution slots.
    #[must_use]
    pub fn occupied_slots(&self) -> usize {
        self.state.read().slots.len()
    }

    /// Whether new submissions are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.state.read().accepting
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop admitting jobs and cancel every active one.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        if !state.accepting {
            return;
        }
        state.accepting = false;

        let active: Vec<JobId> = state
            .registry
            .snapshot()
            .into_iter()
            .filter(|r| r.status.is_active())
            .map(|r| r.id)
            .collect();
        for id in &active {
            if let Err(e) = self.cancel_locked(&mut state, id) {
                tracing::warn!(job_id = %id, error = %e, "Failed to cancel job during shutdown");
            }
        }
        self.root_cancel.cancel();
        let state = RwLockWriteGuard::downgrade(state);
        self.persist(&state);
        tracing::info!(
            cancelled = active.len(),
            draining = state.slots.len(),
            "Scheduler shutting down"
        );
    }

    /// Wait until every execution slot is free.
    pub async fn wait_idle(&self) {
        let mut rx = self.slot_count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn persist(&self, state: &SchedulerState) {
        let jobs = state.registry.newest(self.settings.history_limit);
        if let Err(e) = self.store.save(&jobs) {
            tracing::error!(error = %e, store = self.store.name(), "Failed to persist job index");
            metrics::record_persistence_failure(StoreOperation::Save);
        }
        self.update_gauges(state);
    }

    fn update_gauges(&self, state: &SchedulerState) {
        let counts = state.registry.counts();
        metrics::set_slot_gauges(state.slots.len(), counts.queued);
    }

    fn emit(&self, record: &JobRecord, kind: JobEventKind) {
        let _ = self.events.send_job_event(JobEvent {
            id: record.id.clone(),
            kind,
            status: record.status,
            progress: record.progress,
        });
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced synchronously to scheduler callers.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Submission failed validation.
    #[error("invalid backtest request: {0}")]
    Validation(#[from] BacktestConfigError),

    /// Unknown job id.
    #[error("backtest {0} not found")]
    NotFound(JobId),

    /// Shutdown has begun.
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// Invariant violation.
    #[error("internal scheduler error: {0}")]
    Internal(String),
}

impl From<RegistryError> for SchedulerError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => Self::NotFound(id),
            RegistryError::DuplicateId(_) => Self::Internal(e.to_string()),
        }
    }
}
