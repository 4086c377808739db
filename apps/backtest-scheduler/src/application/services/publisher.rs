//! Status publisher: point reads, list reads, and per-job status streams.
//!
//! Streams are event-driven. Each stream subscribes to the job event hub
//! before taking its first snapshot, then re-reads the registry whenever
//! an event for its job arrives. A poll tick runs alongside as a fallback
//! for lagged receivers, so emission latency is bounded by the poll
//! interval even when events are lost.
//!
//! A frame is emitted only when `(status, progress)` differs from the last
//! frame sent, and the stream ends right after the first terminal frame or
//! when the job is deleted.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::scheduler::{BacktestScheduler, SchedulerError};
use crate::domain::job::{JobId, JobRecord, JobStatus};
use crate::infrastructure::broadcast::JobEvent;

/// Default fallback poll interval for streams.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// List read response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListing {
    /// All jobs, newest first.
    pub backtests: Vec<JobRecord>,
    /// Number of jobs.
    pub total: usize,
    /// Jobs currently running.
    pub running_count: usize,
    /// Jobs waiting for a slot.
    pub queued_count: usize,
    /// Jobs completed successfully.
    pub completed_count: usize,
}

/// Read side of the scheduler.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    scheduler: Arc<BacktestScheduler>,
    poll_interval: Duration,
}

impl StatusPublisher {
    /// Create a publisher over `scheduler`.
    #[must_use]
    pub fn new(scheduler: Arc<BacktestScheduler>, poll_interval: Duration) -> Self {
        Self {
            scheduler,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Point read.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if the id is unknown.
    pub fn get(&self, id: &JobId) -> Result<JobRecord, SchedulerError> {
        self.scheduler.get(id)
    }

    /// All jobs, newest first, with counts.
    #[must_use]
    pub fn list(&self) -> JobListing {
        let snapshot = self.scheduler.snapshot();
        JobListing {
            total: snapshot.counts.total(),
            running_count: snapshot.counts.running,
            queued_count: snapshot.counts.queued,
            completed_count: snapshot.counts.completed,
            backtests: snapshot.jobs,
        }
    }

    /// Open a status stream for one job.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if the id is unknown when the
    /// stream is opened.
    pub fn stream(
        &self,
        id: &JobId,
    ) -> Result<impl Stream<Item = JobRecord> + Send + 'static, SchedulerError> {
        let events = self.scheduler.events().job_events_rx();
        self.scheduler.get(id)?;

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = FrameSource {
            scheduler: Arc::clone(&self.scheduler),
            id: id.clone(),
            events,
            ticker,
            last: None,
            done: false,
        };
        Ok(futures::stream::unfold(state, |mut source| async move {
            source.next_frame().await.map(|frame| (frame, source))
        }))
    }
}

struct FrameSource {
    scheduler: Arc<BacktestScheduler>,
    id: JobId,
    events: broadcast::Receiver<JobEvent>,
    ticker: Interval,
    last: Option<(JobStatus, f64)>,
    done: bool,
}

impl FrameSource {
    async fn next_frame(&mut self) -> Option<JobRecord> {
        if self.done {
            return None;
        }
        loop {
            let Ok(current) = self.scheduler.get(&self.id) else {
                self.done = true;
                return None;
            };

            let key = (current.status, current.progress);
            if self.last != Some(key) {
                self.last = Some(key);
                self.done = current.status.is_terminal();
                return Some(current);
            }

            self.wait_for_change().await;
        }
    }

    async fn wait_for_change(&mut self) {
        loop {
            tokio::select! {
                received = self.events.recv() => match received {
                    Ok(event) if event.id == self.id => return,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(job_id = %self.id, skipped, "Status stream lagged");
                        return;
                    }
                    Err(RecvError::Closed) => {
                        self.ticker.tick().await;
                        return;
                    }
                },
                _ = self.ticker.tick() => return,
            }
        }
    }
}
