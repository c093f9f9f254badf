//! Redis storage implementation.
//!
//! Key layout, with `ns` the configured namespace:
//!
//! | key              | type   | contents                          |
//! |------------------|--------|-----------------------------------|
//! | `ns:jobs`        | hash   | job id -> JSON job                |
//! | `ns:env`         | string | environment blob                  |
//! | `ns:runs:<id>`   | list   | JSON run records, newest at head  |
//! | `ns:backups`     | hash   | backup name -> JSON descriptor    |
//!
//! Updates are read-modify-write without WATCH, so two writers racing on
//! the same job resolve last-write-wins.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Instant;
use tracing::{debug, info};

use super::{
    BackupDescriptor, ExecutionRecord, SavedMark, Storage, StorageError, sort_newest_first,
};
use crate::core::job::Job;
use crate::core::types::JobId;

/// Redis storage backend.
pub struct RedisStorage {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStorage {
    /// Connect to `url` and verify the server answers.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)
            .map_err(|e| StorageError::Unavailable(format!("invalid Redis URL {}: {}", url, e)))?;

        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StorageError::Unavailable(format!("failed to connect to Redis: {}", e)))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Redis ping failed: {}", e)))?;

        info!(namespace = %namespace, "Redis storage initialized");

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    fn jobs_key(&self) -> String {
        format!("{}:jobs", self.namespace)
    }

    fn env_key(&self) -> String {
        format!("{}:env", self.namespace)
    }

    fn runs_key(&self, job_id: &JobId) -> String {
        format!("{}:runs:{}", self.namespace, job_id)
    }

    fn backups_key(&self) -> String {
        format!("{}:backups", self.namespace)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        let raw: Option<String> = self
            .conn()
            .hget(self.jobs_key(), id.as_str())
            .await
            .map_err(redis_error)?;
        raw.map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    async fn store_job(&self, job: &Job) -> Result<(), StorageError> {
        let json = serde_json::to_string(job)?;
        let _: () = self
            .conn()
            .hset(self.jobs_key(), job.id.as_str(), json)
            .await
            .map_err(redis_error)?;
        Ok(())
    }
}

fn redis_error(e: redis::RedisError) -> StorageError {
    StorageError::Other(format!("Redis error: {}", e))
}

#[async_trait]
impl Storage for RedisStorage {
    async fn insert_job(&self, job: Job) -> Result<(), StorageError> {
        let json = serde_json::to_string(&job)?;
        let inserted: bool = self
            .conn()
            .hset_nx(self.jobs_key(), job.id.as_str(), json)
            .await
            .map_err(redis_error)?;

        if !inserted {
            return Err(StorageError::DuplicateKey(format!("job: {}", job.id)));
        }
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        self.load_job(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let start = Instant::now();
        let values: Vec<String> = self
            .conn()
            .hvals(self.jobs_key())
            .await
            .map_err(redis_error)?;

        let mut jobs = values
            .iter()
            .map(|json| serde_json::from_str::<Job>(json).map_err(StorageError::from))
            .collect::<Result<Vec<_>, _>>()?;
        sort_newest_first(&mut jobs);

        debug!(count = jobs.len(), elapsed_ms = start.elapsed().as_millis() as u64, "listed jobs from Redis");
        Ok(jobs)
    }

    async fn replace_job(&self, job: Job) -> Result<(), StorageError> {
        let exists: bool = self
            .conn()
            .hexists(self.jobs_key(), job.id.as_str())
            .await
            .map_err(redis_error)?;
        if !exists {
            return Err(StorageError::NotFound(format!("job: {}", job.id)));
        }
        self.store_job(&job).await
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let removed: usize = self
            .conn()
            .hdel(self.jobs_key(), id.as_str())
            .await
            .map_err(redis_error)?;
        if removed == 0 {
            return Err(StorageError::NotFound(format!("job: {}", id)));
        }
        Ok(())
    }

    async fn mark_saved(&self, marks: &[SavedMark]) -> Result<usize, StorageError> {
        let mut marked = 0;
        for mark in marks {
            let Some(mut job) = self.load_job(&mark.id).await? else {
                continue;
            };
            if job.last_modified != mark.last_modified {
                continue;
            }
            job.saved = true;
            self.store_job(&job).await?;
            marked += 1;
        }
        Ok(marked)
    }

    async fn environment(&self) -> Result<String, StorageError> {
        let env: Option<String> = self
            .conn()
            .get(self.env_key())
            .await
            .map_err(redis_error)?;
        Ok(env.unwrap_or_default())
    }

    async fn set_environment(&self, text: &str) -> Result<(), StorageError> {
        let _: () = self
            .conn()
            .set(self.env_key(), text)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn append_run(&self, record: ExecutionRecord) -> Result<(), StorageError> {
        let json = serde_json::to_string(&record)?;
        let _: usize = self
            .conn()
            .lpush(self.runs_key(&record.job_id), json)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    /// Runs come back in append order, newest first.
    async fn list_runs(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let values: Vec<String> = self
            .conn()
            .lrange(self.runs_key(job_id), 0, limit as isize - 1)
            .await
            .map_err(redis_error)?;

        values
            .iter()
            .map(|json| serde_json::from_str(json).map_err(StorageError::from))
            .collect()
    }

    async fn list_backups(&self) -> Result<Vec<BackupDescriptor>, StorageError> {
        let values: Vec<String> = self
            .conn()
            .hvals(self.backups_key())
            .await
            .map_err(redis_error)?;

        let mut backups = values
            .iter()
            .map(|json| serde_json::from_str::<BackupDescriptor>(json).map_err(StorageError::from))
            .collect::<Result<Vec<_>, _>>()?;
        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));
        Ok(backups)
    }
}
