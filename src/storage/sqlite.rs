//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Timestamps are stored
//! as fixed-width RFC 3339 strings so text ordering matches time ordering.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{BackupDescriptor, ExecutionRecord, SavedMark, Storage, StorageError};
use crate::core::job::{Job, Mailing};
use crate::core::types::{JobId, RunId};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

type JobRow = (
    String,
    String,
    String,
    String,
    bool,
    bool,
    String,
    Option<String>,
    String,
    String,
    bool,
);

type RunRow = (
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<String>,
);

const JOB_COLUMNS: &str = "id, name, command, schedule, stopped, logging, mailing, hook, created, last_modified, saved";

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let storage = Self {
            pool,
            path: Some(path.as_ref().to_path_buf()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let storage = Self { pool, path: None };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn time_to_string(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn string_to_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("bad timestamp {:?}: {}", s, e)))
}

fn row_to_job(row: JobRow) -> Result<Job, StorageError> {
    let mailing: Mailing = serde_json::from_str(&row.6)?;
    Ok(Job {
        id: JobId::new(row.0),
        name: row.1,
        command: row.2,
        schedule: row.3,
        stopped: row.4,
        logging: row.5,
        mailing,
        hook: row.7,
        created: string_to_time(&row.8)?,
        last_modified: string_to_time(&row.9)?,
        saved: row.10,
    })
}

fn row_to_run(row: RunRow) -> Result<ExecutionRecord, StorageError> {
    let id = uuid::Uuid::parse_str(&row.0)
        .map_err(|e| StorageError::SerializationError(format!("bad run id {:?}: {}", row.0, e)))?;
    Ok(ExecutionRecord {
        id: RunId::from_uuid(id),
        job_id: JobId::new(row.1),
        started_at: string_to_time(&row.2)?,
        ended_at: row.3.as_deref().map(string_to_time).transpose()?,
        exit_code: row.4.map(|code| code as i32),
        stdout_tail: row.5,
        stderr_tail: row.6,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_job(&self, job: Job) -> Result<(), StorageError> {
        let mailing = serde_json::to_string(&job.mailing)?;
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, name, command, schedule, stopped, logging, mailing, hook, created, last_modified, saved)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.name)
        .bind(&job.command)
        .bind(&job.schedule)
        .bind(job.stopped)
        .bind(job.logging)
        .bind(mailing)
        .bind(&job.hook)
        .bind(time_to_string(&job.created))
        .bind(time_to_string(&job.last_modified))
        .bind(job.saved)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("job: {}", job.id)))
            }
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StorageError> {
        let row: JobRow = sqlx::query_as(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))?;

        row_to_job(row)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs ORDER BY created DESC, id ASC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn replace_job(&self, job: Job) -> Result<(), StorageError> {
        let mailing = serde_json::to_string(&job.mailing)?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET name = ?, command = ?, schedule = ?, stopped = ?, logging = ?, mailing = ?,
                hook = ?, created = ?, last_modified = ?, saved = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.name)
        .bind(&job.command)
        .bind(&job.schedule)
        .bind(job.stopped)
        .bind(job.logging)
        .bind(mailing)
        .bind(&job.hook)
        .bind(time_to_string(&job.created))
        .bind(time_to_string(&job.last_modified))
        .bind(job.saved)
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job: {}", job.id)));
        }
        Ok(())
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job: {}", id)));
        }
        Ok(())
    }

    async fn mark_saved(&self, marks: &[SavedMark]) -> Result<usize, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut marked = 0;
        for mark in marks {
            let result =
                sqlx::query("UPDATE jobs SET saved = 1 WHERE id = ? AND last_modified = ?")
                    .bind(mark.id.as_str())
                    .bind(time_to_string(&mark.last_modified))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StorageError::Other(e.to_string()))?;
            marked += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(marked)
    }

    async fn environment(&self) -> Result<String, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT content FROM environment WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(row.map(|r| r.0).unwrap_or_default())
    }

    async fn set_environment(&self, text: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO environment (id, content, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at
            "#,
        )
        .bind(text)
        .bind(time_to_string(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    async fn append_run(&self, record: ExecutionRecord) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO execution_log (id, job_id, started_at, ended_at, exit_code, stdout_tail, stderr_tail)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.job_id.as_str())
        .bind(time_to_string(&record.started_at))
        .bind(record.ended_at.as_ref().map(time_to_string))
        .bind(record.exit_code.map(i64::from))
        .bind(&record.stdout_tail)
        .bind(&record.stderr_tail)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("run: {}", record.id)))
            }
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn list_runs(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"
            SELECT id, job_id, started_at, ended_at, exit_code, stdout_tail, stderr_tail
            FROM execution_log WHERE job_id = ?
            ORDER BY started_at DESC LIMIT ?
            "#,
        )
        .bind(job_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_run).collect()
    }

    async fn list_backups(&self) -> Result<Vec<BackupDescriptor>, StorageError> {
        let Some(dir) = self.path.as_deref().and_then(Path::parent) else {
            return Ok(Vec::new());
        };
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StorageError::Other(format!("reading {}: {}", dir.display(), e)))?;

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("backup") || !name.ends_with(".db") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(|e| StorageError::Other(e.to_string()))?;

            backups.push(BackupDescriptor {
                name,
                path: Some(entry.path()),
                created: DateTime::<Utc>::from(modified),
            });
        }

        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));
        Ok(backups)
    }
}
