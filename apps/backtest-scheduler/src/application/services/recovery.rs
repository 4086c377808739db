//! Startup recovery of persisted jobs.
//!
//! Loads the trimmed index and reconciles jobs left active by a previous
//! process:
//! 1. Read the index from the store (a failed read means no history)
//! 2. Rewrite every `queued` or `running` job to `cancelled`, filling in
//!    `completedAt` if it is missing
//! 3. Hand the reconciled set to the registry
//!
//! Nothing is known about whether the engine behind an orphaned job is
//! still running, so every orphan is treated as dead.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::application::ports::JobStore;
use crate::domain::registry::JobRegistry;
use crate::infrastructure::metrics::{StoreOperation, record_persistence_failure};

// ============================================================================
// Recovery Report
// ============================================================================

/// Outcome of startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records read from the store.
    pub loaded: usize,
    /// Active records rewritten to `cancelled`.
    pub orphaned: usize,
    /// The store could not be read; the registry starts empty.
    pub load_failed: bool,
}

impl RecoveryReport {
    /// Whether the reconciled state differs from what is on disk.
    #[must_use]
    pub const fn needs_save(&self) -> bool {
        self.orphaned > 0
    }
}

// ============================================================================
// Recovery
// ============================================================================

/// Load and reconcile the persisted index.
pub fn recover(store: &dyn JobStore, now: DateTime<Utc>) -> (JobRegistry, RecoveryReport) {
    let mut records = match store.load() {
        Ok(records) => records,
        Err(e) => {
            error!(error = %e, store = store.name(), "Failed to load job index, starting empty");
            record_persistence_failure(StoreOperation::Load);
            return (
                JobRegistry::new(),
                RecoveryReport {
                    load_failed: true,
                    ..RecoveryReport::default()
                },
            );
        }
    };

    let loaded = records.len();
    let mut orphaned = 0;
    for record in &mut records {
        let previous = record.status;
        if record.reconcile_orphan(now) {
            orphaned += 1;
            warn!(job_id = %record.id, previous = %previous, "Orphaned job marked cancelled");
        }
    }

    let registry = JobRegistry::from_records(records);
    let report = RecoveryReport {
        loaded,
        orphaned,
        load_failed: false,
    };
    info!(
        loaded = report.loaded,
        orphaned = report.orphaned,
        registry_size = registry.len(),
        "Job recovery complete"
    );
    (registry, report)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::PersistenceError;
    use crate::domain::job::{
        BacktestRequest, BacktestResult, DateRange, JobId, JobRecord, JobStatus,
    };
    use crate::infrastructure::persistence::InMemoryJobStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn job(id: &str) -> JobRecord {
        let config = BacktestRequest::default().normalize(at(0)).unwrap();
        JobRecord::new(JobId::new(id), config, at(0))
    }

    struct BrokenStore;

    impl JobStore for BrokenStore {
        fn load(&self) -> Result<Vec<JobRecord>, PersistenceError> {
            Err(PersistenceError::Io(std::io::Error::other("disk on fire")))
        }
        fn save(&self, _jobs: &[JobRecord]) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn write_artifact(&self, _job: &JobRecord) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn orphans_become_cancelled_and_completed_survive() {
        let queued = job("queued");

        let mut running = job("running");
        running.start(at(1)).unwrap();
        running.record_progress(35.0);

        let mut completed = job("completed");
        completed.start(at(1)).unwrap();
        completed
            .complete(
                BacktestResult {
                    portfolio: serde_json::json!({}),
                    trades: vec![],
                    metrics: serde_json::json!({}),
                    equity_curve: vec![],
                    signals: vec![],
                    date_range: DateRange {
                        start: at(0),
                        end: at(1),
                    },
                    duration: 1,
                },
                at(2),
            )
            .unwrap();

        let store = InMemoryJobStore::with_records(vec![
            queued,
            running,
            completed.clone(),
        ]);

        let (registry, report) = recover(&store, at(100));
        assert_eq!(report.loaded, 3);
        assert_eq!(report.orphaned, 2);
        assert!(report.needs_save());

        for id in ["queued", "running"] {
            let record = registry.get(&JobId::new(id)).unwrap();
            assert_eq!(record.status, JobStatus::Cancelled);
            assert_eq!(record.completed_at, Some(at(100)));
        }
        assert_eq!(registry.get(&JobId::new("completed")).unwrap(), &completed);
    }

    #[test]
    fn failed_load_starts_empty() {
        let (registry, report) = recover(&BrokenStore, at(0));
        assert!(registry.is_empty());
        assert!(report.load_failed);
        assert!(!report.needs_save());
    }
}
