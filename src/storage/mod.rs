//! Storage abstraction for persisting jobs, the environment blob and run
//! history.
//!
//! This module provides a trait-based storage abstraction with pluggable
//! backends (in-memory, SQLite, Redis). Callers go through [`JobStore`],
//! which adds validation, caching, timeouts and the optional mirror on top
//! of whichever backend [`open`] returns.

mod cache;
mod memory;
mod mirror;
#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "sqlite")]
mod sqlite;
mod store;

pub use cache::{CacheConfig, QueryCache};
pub use memory::InMemoryStorage;
pub use mirror::{Mirror, MirrorEvent, MirrorQueue, StorageMirror};
#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
pub use store::{JobStore, StoreError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::core::job::Job;
use crate::core::types::{JobId, RunId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The backend could not be reached or was not compiled in.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// One recorded run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Unique run identifier.
    pub id: RunId,
    /// Job that ran.
    pub job_id: JobId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended, if it has.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Exit status, if known.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Last part of stdout.
    #[serde(default)]
    pub stdout_tail: Option<String>,
    /// Last part of stderr.
    #[serde(default)]
    pub stderr_tail: Option<String>,
}

impl ExecutionRecord {
    /// Start a record for a run that began at `started_at`.
    pub fn new(job_id: JobId, started_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            job_id,
            started_at,
            ended_at: None,
            exit_code: None,
            stdout_tail: None,
            stderr_tail: None,
        }
    }

    /// Mark the run finished with an exit status.
    pub fn finished(mut self, ended_at: DateTime<Utc>, exit_code: i32) -> Self {
        self.ended_at = Some(ended_at);
        self.exit_code = Some(exit_code);
        self
    }

    /// Attach captured output tails.
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout_tail = Some(stdout.into());
        self.stderr_tail = Some(stderr.into());
        self
    }

    /// Whether the run ended with exit status zero.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A backup of the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    /// Backup name, e.g. `backup 2024-03-01.db`.
    pub name: String,
    /// Location on disk, for file based backends.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// When the backup was taken.
    pub created: DateTime<Utc>,
}

/// Compare-and-set request used to flag a job as installed.
///
/// The job is only marked when its stored `last_modified` still equals the
/// one seen when the schedule was compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMark {
    pub id: JobId,
    pub last_modified: DateTime<Utc>,
}

impl SavedMark {
    /// Build a mark from the job revision that was installed.
    pub fn for_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            last_modified: job.last_modified,
        }
    }
}

/// Storage trait for persisting job state.
#[async_trait]
pub trait Storage: Send + Sync {
    // Job operations

    /// Insert a new job; fails with `DuplicateKey` if the id exists.
    async fn insert_job(&self, job: Job) -> Result<(), StorageError>;

    /// Get a job by ID.
    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError>;

    /// List all jobs, newest created first, ties broken by id.
    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError>;

    /// Overwrite an existing job; fails with `NotFound` if it is missing.
    async fn replace_job(&self, job: Job) -> Result<(), StorageError>;

    /// Delete a job by ID.
    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError>;

    /// Set `saved` on every job whose `last_modified` still matches its
    /// mark. Returns how many jobs were marked.
    async fn mark_saved(&self, marks: &[SavedMark]) -> Result<usize, StorageError>;

    // Environment

    /// Get the environment blob; empty when never set.
    async fn environment(&self) -> Result<String, StorageError>;

    /// Replace the environment blob.
    async fn set_environment(&self, text: &str) -> Result<(), StorageError>;

    // Execution log

    /// Append a run record.
    async fn append_run(&self, record: ExecutionRecord) -> Result<(), StorageError>;

    /// List runs for a job, most recent first. Returns at most `limit` runs.
    async fn list_runs(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError>;

    // Backups

    /// List known backups, newest first.
    async fn list_backups(&self) -> Result<Vec<BackupDescriptor>, StorageError>;
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// SQLite database file.
    Sqlite { path: PathBuf },
    /// Redis server; keys are prefixed with `namespace`.
    Redis {
        url: String,
        #[serde(default = "default_namespace")]
        namespace: String,
    },
    /// Process-local maps.
    Memory,
}

fn default_namespace() -> String {
    "cronkeep".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: PathBuf::from("/var/lib/cronkeep/cronkeep.db"),
        }
    }
}

impl StorageConfig {
    /// Short backend name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Sqlite { .. } => "sqlite",
            StorageConfig::Redis { .. } => "redis",
            StorageConfig::Memory => "memory",
        }
    }
}

/// Open the backend described by `config`.
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    tracing::debug!(backend = config.kind(), "opening storage");

    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStorage::new())),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(SqliteStorage::new(path).await?)),
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::Unavailable(
            "built without sqlite support".to_string(),
        )),
        #[cfg(feature = "redis")]
        StorageConfig::Redis { url, namespace } => {
            Ok(Arc::new(RedisStorage::connect(url, namespace).await?))
        }
        #[cfg(not(feature = "redis"))]
        StorageConfig::Redis { .. } => Err(StorageError::Unavailable(
            "built without redis support".to_string(),
        )),
    }
}

/// Order jobs newest created first, ties broken by id.
pub(crate) fn sort_newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::JobDraft;
    use chrono::TimeZone;

    #[test]
    fn test_storage_config_yaml() {
        let config: StorageConfig =
            serde_yaml::from_str("type: sqlite\npath: /tmp/cronkeep.db\n").unwrap();
        assert_eq!(
            config,
            StorageConfig::Sqlite {
                path: PathBuf::from("/tmp/cronkeep.db")
            }
        );

        let config: StorageConfig =
            serde_yaml::from_str("type: redis\nurl: redis://127.0.0.1/\n").unwrap();
        assert_eq!(
            config,
            StorageConfig::Redis {
                url: "redis://127.0.0.1/".into(),
                namespace: "cronkeep".into()
            }
        );

        let config: StorageConfig = serde_yaml::from_str("type: memory\n").unwrap();
        assert_eq!(config.kind(), "memory");
    }

    #[test]
    fn test_sort_newest_first_breaks_ties_by_id() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut jobs = vec![
            Job::from_draft(JobId::new("b"), JobDraft::new("true", "@daily"), t0),
            Job::from_draft(JobId::new("c"), JobDraft::new("true", "@daily"), t1),
            Job::from_draft(JobId::new("a"), JobDraft::new("true", "@daily"), t0),
        ];

        sort_newest_first(&mut jobs);
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_execution_record_builders() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let record = ExecutionRecord::new(JobId::new("j"), start)
            .finished(start + chrono::Duration::seconds(3), 0)
            .with_output("done", "");

        assert!(record.succeeded());
        assert_eq!(record.stdout_tail.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_open_memory_backend() {
        let storage = open(&StorageConfig::Memory).await.unwrap();
        assert!(storage.list_jobs().await.unwrap().is_empty());
        assert_eq!(storage.environment().await.unwrap(), "");
    }
}
