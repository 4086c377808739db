//! Job Registry
//!
//! In-memory map of every job known to the running process. It is plain
//! data: callers provide the locking, so a registry mutation and whatever
//! must happen atomically with it (slot accounting, persistence, event
//! fan-out) can share one critical section.
//!
//! # Ordering
//!
//! Records are ordered by `created_at`, with insertion order breaking ties
//! between records created in the same instant. "Newest first" and FIFO
//! promotion both use this ordering.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::Serialize;

use crate::domain::job::{JobId, JobRecord, JobStatus};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone)]
struct Entry {
    record: JobRecord,
    seq: u64,
}

impl Entry {
    const fn sort_key(&self) -> (chrono::DateTime<chrono::Utc>, u64) {
        (self.record.created_at, self.seq)
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    /// Waiting for a slot.
    pub queued: usize,
    /// Currently executing.
    pub running: usize,
    /// Finished with a result.
    pub completed: usize,
    /// Finished with an error.
    pub failed: usize,
    /// Cancelled.
    pub cancelled: usize,
}

impl StatusCounts {
    /// Total jobs counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed + self.cancelled
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Authoritative id → record map for the process lifetime.
#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: HashMap<JobId, Entry>,
    next_seq: u64,
}

impl JobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from previously persisted records.
    ///
    /// Duplicate ids keep the first occurrence.
    #[must_use]
    pub fn from_records(mut records: Vec<JobRecord>) -> Self {
        records.sort_by_key(|r| r.created_at);
        let mut registry = Self::new();
        for record in records {
            let _ = registry.insert(record);
        }
        registry
    }

    /// Add a new record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if the id is already present.
    pub fn insert(&mut self, record: JobRecord) -> Result<(), RegistryError> {
        if self.entries.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(record.id.clone(), Entry { record, seq });
        Ok(())
    }

    /// Look up a record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the id is unknown.
    pub fn get(&self, id: &JobId) -> Result<&JobRecord, RegistryError> {
        self.entries
            .get(id)
            .map(|e| &e.record)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Mutate a record in place and return whatever the closure returns.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the id is unknown.
    pub fn update<R>(
        &mut self,
        id: &JobId,
        f: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<R, RegistryError> {
        self.entries
            .get_mut(id)
            .map(|e| f(&mut e.record))
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Remove a record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the id is unknown.
    pub fn remove(&mut self, id: &JobId) -> Result<JobRecord, RegistryError> {
        self.entries
            .remove(id)
            .map(|e| e.record)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Snapshot of all records, newest-created first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.newest(self.entries.len())
    }

    /// The `limit` most recently created records, newest first.
    #[must_use]
    pub fn newest(&self, limit: usize) -> Vec<JobRecord> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| Reverse(e.sort_key()));
        entries
            .into_iter()
            .take(limit)
            .map(|e| e.record.clone())
            .collect()
    }

    /// Ids of queued jobs, oldest first.
    #[must_use]
    pub fn queued_fifo(&self) -> Vec<JobId> {
        let mut queued: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.record.status == JobStatus::Queued)
            .collect();
        queued.sort_by_key(|e| e.sort_key());
        queued.into_iter().map(|e| e.record.id.clone()).collect()
    }

    /// Count records by status.
    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        self.entries
            .values()
            .fold(StatusCounts::default(), |mut acc, e| {
                match e.record.status {
                    JobStatus::Queued => acc.queued += 1,
                    JobStatus::Running => acc.running += 1,
                    JobStatus::Completed => acc.completed += 1,
                    JobStatus::Failed => acc.failed += 1,
                    JobStatus::Cancelled => acc.cancelled += 1,
                }
                acc
            })
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Registry lookup and insert failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Id already present.
    #[error("job {0} already exists")]
    DuplicateId(JobId),

    /// Id unknown.
    #[error("job {0} not found")]
    NotFound(JobId),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::BacktestRequest;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn job(id: &str, created: i64) -> JobRecord {
        let config = BacktestRequest::default().normalize(at(0)).unwrap();
        JobRecord::new(JobId::new(id), config, at(created))
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let mut registry = JobRegistry::new();
        registry.insert(job("a", 0)).unwrap();
        assert_eq!(
            registry.insert(job("a", 1)),
            Err(RegistryError::DuplicateId(JobId::new("a")))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_id_is_not_found() {
        let mut registry = JobRegistry::new();
        let id = JobId::new("ghost");
        assert!(matches!(registry.get(&id), Err(RegistryError::NotFound(_))));
        assert!(registry.update(&id, |_| ()).is_err());
        assert!(registry.remove(&id).is_err());
    }

    #[test]
    fn snapshot_is_newest_first() {
        let mut registry = JobRegistry::new();
        registry.insert(job("old", 0)).unwrap();
        registry.insert(job("new", 20)).unwrap();
        registry.insert(job("mid", 10)).unwrap();

        let ids: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn same_instant_falls_back_to_insertion_order() {
        let mut registry = JobRegistry::new();
        for id in ["a", "b", "c"] {
            registry.insert(job(id, 5)).unwrap();
        }
        let fifo: Vec<_> = registry.queued_fifo().iter().map(ToString::to_string).collect();
        assert_eq!(fifo, vec!["a", "b", "c"]);
        assert_eq!(registry.newest(1)[0].id, JobId::new("c"));
    }

    #[test]
    fn queued_fifo_skips_other_statuses() {
        let mut registry = JobRegistry::new();
        registry.insert(job("a", 0)).unwrap();
        registry.insert(job("b", 1)).unwrap();
        registry.insert(job("c", 2)).unwrap();
        registry
            .update(&JobId::new("a"), |r| r.start(at(3)))
            .unwrap()
            .unwrap();

        assert_eq!(registry.queued_fifo(), vec![JobId::new("b"), JobId::new("c")]);
        let counts = registry.counts();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn from_records_orders_by_creation() {
        let registry = JobRegistry::from_records(vec![job("late", 9), job("early", 1)]);
        assert_eq!(registry.queued_fifo(), vec![JobId::new("early"), JobId::new("late")]);
    }
}
