//! Job Event Broadcast
//!
//! Fan-out of job state changes using a tokio broadcast channel. The
//! scheduler publishes one [`JobEvent`] per registry mutation, inside the
//! same critical section as the mutation, so receivers see events in
//! mutation order.
//!
//! Events are notifications, not state: a receiver that lags and loses
//! events re-reads the registry instead of replaying them.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::job::{JobId, JobStatus};

// =============================================================================
// Events
// =============================================================================

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    /// Accepted into the registry.
    Submitted,
    /// Took an execution slot.
    Started,
    /// Progress moved forward.
    Progress,
    /// Reached a terminal status.
    Finished,
    /// Deleted from the registry.
    Removed,
}

/// A job state change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    /// Job the event is about.
    pub id: JobId,
    /// Event kind.
    pub kind: JobEventKind,
    /// Status after the change.
    pub status: JobStatus,
    /// Progress after the change.
    pub progress: f64,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Broadcast channel configuration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of the job event channel.
    pub job_events_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            job_events_capacity: 1_024,
        }
    }
}

/// Hub for job event distribution.
///
/// # Example
///
/// ```rust
/// use backtest_scheduler::infrastructure::broadcast::{BroadcastConfig, JobEventHub};
///
/// let hub = JobEventHub::new(BroadcastConfig::default());
/// let _rx = hub.job_events_rx();
/// assert_eq!(hub.job_events_receiver_count(), 1);
/// ```
#[derive(Debug)]
pub struct JobEventHub {
    job_events_tx: broadcast::Sender<JobEvent>,
}

impl JobEventHub {
    /// Create a new hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            job_events_tx: broadcast::channel(config.job_events_capacity.max(1)).0,
        }
    }

    /// Create a new hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that got the event, or `None` if
    /// there are no active receivers.
    #[must_use]
    pub fn send_job_event(&self, event: JobEvent) -> Option<usize> {
        self.job_events_tx.send(event).ok()
    }

    /// Get a new receiver for job events.
    #[must_use]
    pub fn job_events_rx(&self) -> broadcast::Receiver<JobEvent> {
        self.job_events_tx.subscribe()
    }

    /// Get the number of active job event receivers.
    #[must_use]
    pub fn job_events_receiver_count(&self) -> usize {
        self.job_events_tx.receiver_count()
    }

    /// Get statistics about the channel.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            job_events_receivers: self.job_events_receiver_count(),
        }
    }
}

/// Shared hub reference.
pub type SharedJobEventHub = Arc<JobEventHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastStats {
    /// Number of job event receivers (open status streams).
    pub job_events_receivers: usize,
}

// =============================================================================
// Tests
// =============================================================================
