//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{
    BackupDescriptor, ExecutionRecord, SavedMark, Storage, StorageError, sort_newest_first,
};
use crate::core::job::Job;
use crate::core::types::JobId;

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts and there are never any backups.
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<JobId, Job>>,
    environment: RwLock<String>,
    runs: RwLock<HashMap<JobId, Vec<ExecutionRecord>>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            environment: RwLock::new(String::new()),
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_job(&self, job: Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StorageError::DuplicateKey(format!("job: {}", job.id)));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        sort_newest_first(&mut result);
        Ok(result)
    }

    async fn replace_job(&self, job: Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("job: {}", job.id))),
        }
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        jobs.remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;
        Ok(())
    }

    async fn mark_saved(&self, marks: &[SavedMark]) -> Result<usize, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut marked = 0;
        for mark in marks {
            if let Some(job) = jobs.get_mut(&mark.id) {
                if job.last_modified == mark.last_modified {
                    job.saved = true;
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn environment(&self) -> Result<String, StorageError> {
        let env = self
            .environment
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(env.clone())
    }

    async fn set_environment(&self, text: &str) -> Result<(), StorageError> {
        let mut env = self
            .environment
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *env = text.to_string();
        Ok(())
    }

    async fn append_run(&self, record: ExecutionRecord) -> Result<(), StorageError> {
        let mut runs = self.runs.write().map_err(|_| StorageError::LockPoisoned)?;
        let history = runs.entry(record.job_id.clone()).or_default();
        if history.iter().any(|r| r.id == record.id) {
            return Err(StorageError::DuplicateKey(format!("run: {}", record.id)));
        }
        history.push(record);
        Ok(())
    }

    async fn list_runs(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result = runs.get(job_id).cloned().unwrap_or_default();
        // Sort by started_at descending (most recent first)
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_backups(&self) -> Result<Vec<BackupDescriptor>, StorageError> {
        Ok(Vec::new())
    }
}
