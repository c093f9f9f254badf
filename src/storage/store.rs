//! The job store facade.
//!
//! [`JobStore`] is the only way the rest of the crate touches persisted
//! state. It validates every write, keeps the query cache coherent, bounds
//! each backend call with a timeout and forwards mutations to the optional
//! mirror.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use super::cache::{CacheConfig, QueryCache};
use super::mirror::{Mirror, MirrorEvent, MirrorQueue, StorageMirror};
use super::{BackupDescriptor, ExecutionRecord, SavedMark, Storage, StorageError};
use crate::config::Settings;
use crate::core::environment::Environment;
use crate::core::job::{Job, JobDraft, JobPatch};
use crate::core::types::JobId;
use crate::validation::{ValidationError, Validator, check_environment};

/// Default bound on a single backend call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by [`JobStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A field failed validation; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No job with this id.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The backend did not answer in time.
    #[error("storage operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug, Clone)]
enum CachedQuery {
    Job(Option<Job>),
    Jobs(Vec<Job>),
}

const LIST_KEY: &str = "list";

fn get_key(id: &JobId) -> String {
    format!("get:{}", id)
}

/// Validated, cached access to a storage backend.
pub struct JobStore {
    backend: Arc<dyn Storage>,
    cache: QueryCache<CachedQuery>,
    validator: Validator,
    mirror: Option<MirrorQueue>,
    timeout: Duration,
}

impl JobStore {
    /// Wrap a backend with default cache settings, a UTC validator and no
    /// mirror.
    pub fn new(backend: Arc<dyn Storage>) -> Self {
        Self {
            backend,
            cache: QueryCache::new(&CacheConfig::default()),
            validator: Validator::new(),
            mirror: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Open the configured backend and mirror.
    pub async fn from_settings(settings: &Settings) -> Result<Self, StoreError> {
        let backend = super::open(&settings.storage).await?;

        let mut store = Self::new(backend)
            .with_cache(&settings.cache)
            .with_validator(Validator::new().with_timezone(settings.timezone.as_str()))
            .with_timeout(settings.timeouts.store());

        if let Some(mirror_config) = &settings.legacy_mirror {
            let target = super::open(mirror_config).await?;
            info!(backend = mirror_config.kind(), "mirroring writes to legacy store");
            store = store.with_mirror(Arc::new(StorageMirror::new(target)));
        }

        Ok(store)
    }

    /// Replace the cache.
    pub fn with_cache(mut self, config: &CacheConfig) -> Self {
        self.cache = QueryCache::new(config);
        self
    }

    /// Replace the validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Forward mutations to a mirror in the background, each write bounded by
    /// the store timeout. Must be called from within a Tokio runtime; set the
    /// timeout first.
    pub fn with_mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirror = Some(MirrorQueue::spawn(mirror, self.timeout));
        self
    }

    /// Bound each backend call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The validator applied to writes.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Create a job from a draft.
    pub async fn create(&self, draft: JobDraft) -> Result<Job, StoreError> {
        self.validator.validate_draft(&draft)?;

        let job = Job::from_draft(JobId::generate(), draft, Utc::now());
        self.call("insert_job", self.backend.insert_job(job.clone()))
            .await?;
        self.cache.invalidate();
        self.reflect(MirrorEvent::JobWritten(job.clone()));

        info!(job_id = %job.id, schedule = %job.schedule, "job created");
        Ok(job)
    }

    /// Get a job by id.
    pub async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let key = get_key(id);
        if let Some(CachedQuery::Job(job)) = self.cache.get(&key) {
            debug!(job_id = %id, "cache hit");
            return Ok(job);
        }

        let generation = self.cache.generation();
        let job = match self.call("get_job", self.backend.get_job(id)).await {
            Ok(job) => Some(job),
            Err(StoreError::Storage(StorageError::NotFound(_))) => None,
            Err(e) => return Err(e),
        };
        self.cache
            .insert(key, CachedQuery::Job(job.clone()), generation);
        Ok(job)
    }

    /// List every job, newest created first.
    pub async fn list(&self) -> Result<Vec<Job>, StoreError> {
        if let Some(CachedQuery::Jobs(jobs)) = self.cache.get(LIST_KEY) {
            debug!(count = jobs.len(), "cache hit");
            return Ok(jobs);
        }

        let generation = self.cache.generation();
        let jobs = self.call("list_jobs", self.backend.list_jobs()).await?;
        self.cache
            .insert(LIST_KEY, CachedQuery::Jobs(jobs.clone()), generation);
        Ok(jobs)
    }

    /// Apply a patch to a job.
    pub async fn update(&self, id: &JobId, patch: JobPatch) -> Result<Job, StoreError> {
        let mut job = self.fetch(id).await?;
        let now = next_timestamp(job.last_modified);
        patch.apply(&mut job, now);
        self.validator.validate_job(&job)?;

        match self
            .call("replace_job", self.backend.replace_job(job.clone()))
            .await
        {
            Err(StoreError::Storage(StorageError::NotFound(_))) => {
                return Err(StoreError::NotFound(id.clone()));
            }
            other => other?,
        }
        self.cache.invalidate();
        self.reflect(MirrorEvent::JobWritten(job.clone()));

        info!(job_id = %job.id, "job updated");
        Ok(job)
    }

    /// Stop or start a job.
    pub async fn set_stopped(&self, id: &JobId, stopped: bool) -> Result<Job, StoreError> {
        self.update(
            id,
            JobPatch {
                stopped: Some(stopped),
                ..JobPatch::default()
            },
        )
        .await
    }

    /// Delete a job.
    pub async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
        match self.call("delete_job", self.backend.delete_job(id)).await {
            Err(StoreError::Storage(StorageError::NotFound(_))) => {
                return Err(StoreError::NotFound(id.clone()));
            }
            other => other?,
        }
        self.cache.invalidate();
        self.reflect(MirrorEvent::JobDeleted(id.clone()));

        info!(job_id = %id, "job deleted");
        Ok(())
    }

    /// The environment blob.
    pub async fn environment(&self) -> Result<String, StoreError> {
        self.call("environment", self.backend.environment()).await
    }

    /// Validate and replace the environment blob.
    pub async fn set_environment(&self, text: &str) -> Result<(), StoreError> {
        check_environment(&Environment::new(text))?;

        self.call("set_environment", self.backend.set_environment(text))
            .await?;
        self.cache.invalidate();
        self.reflect(MirrorEvent::EnvironmentWritten(text.to_string()));

        info!("environment updated");
        Ok(())
    }

    /// Backups of the durable store.
    pub async fn backups(&self) -> Result<Vec<BackupDescriptor>, StoreError> {
        self.call("list_backups", self.backend.list_backups()).await
    }

    /// Append a run record to the execution log.
    pub async fn record_run(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        self.call("append_run", self.backend.append_run(record)).await
    }

    /// Most recent runs of a job.
    pub async fn runs(&self, id: &JobId, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.call("list_runs", self.backend.list_runs(id, limit))
            .await
    }

    /// Flag installed job revisions as saved. Returns how many were marked.
    pub async fn mark_saved(&self, marks: &[SavedMark]) -> Result<usize, StoreError> {
        let marked = self
            .call("mark_saved", self.backend.mark_saved(marks))
            .await?;
        self.cache.invalidate();
        self.reflect(MirrorEvent::JobsMarked(marks.to_vec()));
        Ok(marked)
    }

    /// Read a job straight from the backend.
    async fn fetch(&self, id: &JobId) -> Result<Job, StoreError> {
        match self.call("get_job", self.backend.get_job(id)).await {
            Err(StoreError::Storage(StorageError::NotFound(_))) => {
                Err(StoreError::NotFound(id.clone()))
            }
            other => other,
        }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(StoreError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        debug!(
            operation,
            elapsed_ms = start.elapsed().as_millis() as u64,
            outcome,
            "storage call"
        );
        result
    }

    /// Wait for queued mirror writes to finish.
    pub async fn flush_mirror(&self) {
        if let Some(mirror) = &self.mirror {
            mirror.flush().await;
        }
    }

    fn reflect(&self, event: MirrorEvent) {
        if let Some(mirror) = &self.mirror {
            mirror.push(event);
        }
    }
}

/// A modification time strictly after `previous`, so compare-and-set on
/// `last_modified` always sees an edit.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + ChronoDuration::nanoseconds(1)
    }
}
