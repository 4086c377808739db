//! Application Services
//!
//! - `scheduler`: admission control, slot accounting, cancellation
//! - `executor`: drives the simulation engine for one started job
//! - `publisher`: point, list, and streaming reads
//! - `recovery`: startup load and reconciliation of persisted jobs

pub(crate) mod executor;
pub mod publisher;
pub mod recovery;
pub mod scheduler;

pub use publisher::{DEFAULT_POLL_INTERVAL, JobListing, StatusPublisher};
pub use recovery::{RecoveryReport, recover};
pub use scheduler::{
    BacktestScheduler, CancelOutcome, JobSnapshot, SchedulerError, SchedulerSettings,
    SubmitReceipt,
};
