//! JSON file job store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <root>/index.json                        trimmed index, overwritten on every save
//! <root>/results/<YYYY-MM-DD>/<id>.json    one artifact per completed/failed job
//! ```
//!
//! The index is written to a temporary sibling and renamed into place, so a
//! crash mid-write leaves the previous index intact.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::ports::{JobStore, PersistenceError};
use crate::domain::job::JobRecord;

const INDEX_FILE: &str = "index.json";
const INDEX_TMP_FILE: &str = "index.json.tmp";
const RESULTS_DIR: &str = "results";
const INDEX_VERSION: u32 = 1;

// ============================================================================
// Index Format
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile {
    version: u32,
    saved_at: DateTime<Utc>,
    backtests: Vec<JobRecord>,
}

// ============================================================================
// Store
// ============================================================================

/// File-backed [`JobStore`].
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `root`. Directories are created on first
    /// write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the trimmed index.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Path of the artifact for `job`, keyed by creation date and id.
    #[must_use]
    pub fn artifact_path(&self, job: &JobRecord) -> PathBuf {
        self.root
            .join(RESULTS_DIR)
            .join(job.created_at.format("%Y-%m-%d").to_string())
            .join(format!("{}.json", job.id))
    }
}

impl JobStore for JsonFileStore {
    fn load(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        let path = self.index_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No job index found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let index: IndexFile = serde_json::from_str(&raw)?;
        debug!(
            path = %path.display(),
            version = index.version,
            count = index.backtests.len(),
            "Job index loaded"
        );
        Ok(index.backtests)
    }

    fn save(&self, jobs: &[JobRecord]) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.root)?;

        let tmp = self.root.join(INDEX_TMP_FILE);
        {
            let file = fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(
                &mut writer,
                &IndexFileRef {
                    version: INDEX_VERSION,
                    saved_at: Utc::now(),
                    backtests: jobs,
                },
            )?;
            writer.flush()?;
        }
        fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn write_artifact(&self, job: &JobRecord) -> Result<(), PersistenceError> {
        let path = self.artifact_path(job);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PersistenceError::ArtifactExists(path));
            }
            Err(e) => return Err(e.into()),
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, job)?;
        writer.flush()?;
        debug!(job_id = %job.id, path = %path.display(), "Result artifact written");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-file"
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexFileRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    backtests: &'a [JobRecord],
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{BacktestRequest, JobId, JobStatus};
    use chrono::TimeZone;

    fn job(id: &str) -> JobRecord {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
        let config = BacktestRequest::default().normalize(created).unwrap();
        JobRecord::new(JobId::new(id), config, created)
    }

    #[test]
    fn missing_index_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut running = job("b");
        running.start(Utc::now()).unwrap();
        let jobs = vec![running, job("a")];

        store.save(&jobs).unwrap();
        assert_eq!(store.load().unwrap(), jobs);
        assert!(!dir.path().join(INDEX_TMP_FILE).exists());
    }

    #[test]
    fn save_overwrites_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&[job("a"), job("b")]).unwrap();
        store.save(&[job("c")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, JobId::new("c"));
    }

    #[test]
    fn corrupt_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        fs::write(store.index_path(), b"{ not json").unwrap();
        assert!(matches!(
            store.load(),
            Err(PersistenceError::Serialization(_))
        ));
    }

    #[test]
    fn artifact_keyed_by_date_and_id_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut failed = job("bt_x");
        failed.start(Utc::now()).unwrap();
        failed.fail("no data".to_string(), Utc::now()).unwrap();

        store.write_artifact(&failed).unwrap();
        let path = dir.path().join("results/2025-06-01/bt_x.json");
        assert_eq!(store.artifact_path(&failed), path);

        let written: JobRecord =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.status, JobStatus::Failed);

        assert!(matches!(
            store.write_artifact(&failed),
            Err(PersistenceError::ArtifactExists(_))
        ));
    }
}
