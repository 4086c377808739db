//! In-memory job store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::application::ports::{JobStore, PersistenceError};
use crate::domain::job::{JobId, JobRecord};

/// In-memory implementation of [`JobStore`].
///
/// Suitable for testing and for running without a data directory. Saves
/// can be made to fail on demand to exercise best-effort persistence.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    index: RwLock<Vec<JobRecord>>,
    artifacts: RwLock<HashMap<JobId, JobRecord>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose index already holds `records`.
    #[must_use]
    pub fn with_records(records: Vec<JobRecord>) -> Self {
        Self {
            index: RwLock::new(records),
            ..Self::default()
        }
    }

    /// Last saved index.
    #[must_use]
    pub fn index(&self) -> Vec<JobRecord> {
        self.index.read().clone()
    }

    /// Artifact written for `id`, if any.
    #[must_use]
    pub fn artifact(&self, id: &JobId) -> Option<JobRecord> {
        self.artifacts.read().get(id).cloned()
    }

    /// Number of artifacts written.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.read().len()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl JobStore for InMemoryJobStore {
    fn load(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        Ok(self.index.read().clone())
    }

    fn save(&self, jobs: &[JobRecord]) -> Result<(), PersistenceError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io(std::io::Error::other(
                "simulated save failure",
            )));
        }
        *self.index.write() = jobs.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_artifact(&self, job: &JobRecord) -> Result<(), PersistenceError> {
        let mut artifacts = self.artifacts.write();
        if artifacts.contains_key(&job.id) {
            return Err(PersistenceError::ArtifactExists(
                format!("memory://{}", job.id).into(),
            ));
        }
        artifacts.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::BacktestRequest;
    use chrono::Utc;

    fn job(id: &str) -> JobRecord {
        let now = Utc::now();
        JobRecord::new(
            JobId::new(id),
            BacktestRequest::default().normalize(now).unwrap(),
            now,
        )
    }

    #[test]
    fn failing_saves_leave_index_untouched() {
        let store = InMemoryJobStore::new();
        store.save(&[job("a")]).unwrap();
        store.set_fail_saves(true);
        assert!(store.save(&[job("b")]).is_err());

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.index()[0].id, JobId::new("a"));
    }

    #[test]
    fn artifacts_are_write_once() {
        let store = InMemoryJobStore::new();
        let record = job("a");
        store.write_artifact(&record).unwrap();
        assert!(store.write_artifact(&record).is_err());
        assert_eq!(store.artifact_count(), 1);
    }
}
