//! Job Store Port (Driven Port)
//!
//! Durable storage for the trimmed job index and the per-job result
//! artifacts.
//!
//! Methods are synchronous: the scheduler issues each save before it lets
//! the next mutation in, so a later save can never be overtaken by an
//! earlier one. Readers are not excluded while a save runs.

use std::path::PathBuf;

use crate::domain::job::JobRecord;

/// Port for job persistence.
pub trait JobStore: Send + Sync {
    /// Read the persisted index. A missing index is an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the index exists but cannot be read.
    fn load(&self) -> Result<Vec<JobRecord>, PersistenceError>;

    /// Overwrite the index with `jobs`. The caller passes the records to
    /// keep, already trimmed and newest first.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on I/O or serialization failure.
    fn save(&self, jobs: &[JobRecord]) -> Result<(), PersistenceError>;

    /// Write the long-term artifact for a completed or failed job.
    /// Artifacts are written once and never updated.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on I/O or serialization failure, or if
    /// the artifact already exists.
    fn write_artifact(&self, job: &JobRecord) -> Result<(), PersistenceError>;

    /// Store name for logs.
    fn name(&self) -> &'static str;
}

/// Persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode or decode error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Artifact for this job was already written.
    #[error("artifact already exists: {}", .0.display())]
    ArtifactExists(PathBuf),
}
