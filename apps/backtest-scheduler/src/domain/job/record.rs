//! The job record and its state transitions.
//!
//! Every mutation goes through a method here so the record invariants hold
//! no matter who drives it: status only moves forward, `result` exists only
//! on completed jobs, `error` only on failed ones, and a terminal record
//! never changes again except for `completedAt` being filled in.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::BacktestConfig;
use super::status::JobStatus;

// =============================================================================
// Identity
// =============================================================================

/// Opaque job identifier. Generated once, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("bt_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Engine Output
// =============================================================================

/// Simulated period covered by a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    /// First simulated instant.
    pub start: DateTime<Utc>,
    /// Last simulated instant.
    pub end: DateTime<Utc>,
}

/// Engine output for a completed job. Stored as-is; the scheduler never
/// looks inside the payload fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    /// Final portfolio state.
    pub portfolio: Value,
    /// Executed trades.
    pub trades: Vec<Value>,
    /// Computed performance metrics.
    pub metrics: Value,
    /// Equity samples over time.
    pub equity_curve: Vec<Value>,
    /// Signals emitted by the model.
    pub signals: Vec<Value>,
    /// Simulated period.
    pub date_range: DateRange,
    /// Wall-clock run time in milliseconds.
    pub duration: u64,
}

// =============================================================================
// Job Record
// =============================================================================

/// One requested simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job identifier.
    pub id: JobId,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Percent complete in `[0, 100]`.
    pub progress: f64,
    /// Frozen submission parameters.
    pub config: BacktestConfig,
    /// Present only when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BacktestResult>,
    /// Present only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When the job first occupied an execution slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a queued record.
    #[must_use]
    pub const fn new(id: JobId, config: BacktestConfig, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0.0,
            config,
            result: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Move a queued job into an execution slot.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the job is queued.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Apply a progress report. Values are clamped to `[0, 100]`; reports
    /// that would move progress backwards, arrive while the job is not
    /// running, or are NaN are ignored.
    ///
    /// Returns true if progress changed.
    pub fn record_progress(&mut self, percent: f64) -> bool {
        if self.status != JobStatus::Running || percent.is_nan() {
            return false;
        }
        let clamped = percent.clamp(0.0, 100.0);
        if clamped <= self.progress {
            return false;
        }
        self.progress = clamped;
        true
    }

    /// Record a successful engine run.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the job is running.
    pub fn complete(
        &mut self,
        result: BacktestResult,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100.0;
        self.result = Some(result);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Record an engine failure.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless the job is running.
    pub fn fail(&mut self, message: String, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(message);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Cancel an active job and return the status it had.
    ///
    /// A queued job is finished on the spot. A running job keeps
    /// `completed_at` unset until its execution actually winds down.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the job is already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<JobStatus, TransitionError> {
        let previous = self.status;
        self.transition(JobStatus::Cancelled)?;
        if previous == JobStatus::Queued {
            self.completed_at = Some(now);
        }
        Ok(previous)
    }

    /// Fill in `completed_at` on a terminal record if it is still empty.
    ///
    /// Returns true if the record changed.
    pub fn mark_finished(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
            return true;
        }
        false
    }

    /// Treat a job left active by a previous process as dead.
    ///
    /// Returns true if the record was rewritten.
    pub fn reconcile_orphan(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        true
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {id}: invalid transition from {from} to {to}")]
pub struct TransitionError {
    /// Job the transition was attempted on.
    pub id: JobId,
    /// Status at the time of the attempt.
    pub from: JobStatus,
    /// Requested status.
    pub to: JobStatus,
}
