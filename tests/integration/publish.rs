//! Publish scenario integration tests.
//!
//! Tests that drive the full publish protocol against a scratch directory
//! and a shell command standing in for the host scheduler.

use crate::common::Sandbox;
use cronkeep::{JobDraft, JobPatch, PublishError, PublishStep, StoreError, ValidationError};
use std::time::Duration;

/// Test: A nightly backup job is installed and flagged saved.
#[tokio::test]
async fn test_backup_job_is_published_and_saved() {
    let sandbox = Sandbox::new(&["true"]);

    let job = sandbox
        .store
        .create(
            JobDraft::new("/usr/local/bin/backup.sh --all", "0 2 * * *")
                .with_name("nightly backup")
                .with_logging(true),
        )
        .await
        .unwrap();
    assert!(!job.saved);

    let report = sandbox.installer.publish(None).await.unwrap();

    assert_eq!(report.included, vec![job.id.clone()]);
    assert_eq!(report.marked, 1);
    assert_eq!(report.schedule_path, sandbox.schedule_file());

    let text = sandbox.schedule_text();
    let line = text.lines().next().unwrap();
    assert!(line.starts_with("0 2 * * * "));
    assert!(line.contains("/usr/local/bin/backup.sh --all"));
    assert!(line.contains(&format!("{}.stdout", job.id)));

    let stored = sandbox.store.get(&job.id).await.unwrap().unwrap();
    assert!(stored.saved);
}

/// Test: A root removal command never reaches the store.
#[tokio::test]
async fn test_root_removal_is_rejected() {
    let sandbox = Sandbox::new(&["true"]);

    let result = sandbox
        .store
        .create(JobDraft::new("rm -rf /", "0 3 * * *").with_name("cleanup"))
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Validation(ValidationError::BlockedCommand(_)))
    ));
    assert!(sandbox.store.list().await.unwrap().is_empty());

    sandbox.installer.publish(None).await.unwrap();
    assert!(!sandbox.schedule_text().contains("rm -rf"));
}

/// Test: The reload command receives the file that was just written.
#[tokio::test]
async fn test_reload_receives_schedule_file() {
    let dest = tempfile::TempDir::new().unwrap();
    let copy = dest.path().join("installed");
    let copy_arg = copy.to_string_lossy().into_owned();
    let sandbox = Sandbox::new(&["sh", "-c", "cp \"$1\" \"$0\"", copy_arg.as_str()]);

    sandbox
        .store
        .create(JobDraft::new("echo report;", "@daily"))
        .await
        .unwrap();
    sandbox.installer.publish(Some("MAILTO=\"\"")).await.unwrap();

    let installed = std::fs::read_to_string(&copy).unwrap();
    assert_eq!(installed, sandbox.schedule_text());
    assert!(installed.starts_with("MAILTO=\"\"\n@daily "));
}

/// Test: Concurrent publishes run one after another.
#[tokio::test]
async fn test_concurrent_publishes_serialize() {
    let sandbox = Sandbox::new(&["sh", "-c", "sleep 0.2", "reload"]);
    sandbox
        .store
        .create(JobDraft::new("echo a;", "*/5 * * * *"))
        .await
        .unwrap();

    let first = {
        let installer = sandbox.installer.clone();
        tokio::spawn(async move { installer.publish(None).await })
    };
    let second = {
        let installer = sandbox.installer.clone();
        tokio::spawn(async move { installer.publish(None).await })
    };

    let start = std::time::Instant::now();
    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert!(start.elapsed() >= Duration::from_millis(400));
}

/// Test: A second publish is rejected while one is running.
#[tokio::test]
async fn test_try_publish_rejects_concurrent_publish() {
    let sandbox = Sandbox::new(&["sh", "-c", "sleep 0.3", "reload"]);

    let running = {
        let installer = sandbox.installer.clone();
        tokio::spawn(async move { installer.publish(None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rejected = sandbox.installer.try_publish(None).await;
    assert!(matches!(rejected, Err(PublishError::InProgress)));

    assert!(running.await.unwrap().is_ok());
}

/// Test: The saved flag follows mutations and publishes; stopped jobs are untouched.
#[tokio::test]
async fn test_saved_flag_lifecycle() {
    let sandbox = Sandbox::new(&["true"]);
    let store = &sandbox.store;

    let active = store
        .create(JobDraft::new("echo active;", "0 * * * *"))
        .await
        .unwrap();
    let stopped = store
        .create(JobDraft::new("echo stopped;", "0 * * * *").with_stopped(true))
        .await
        .unwrap();

    sandbox.installer.publish(None).await.unwrap();
    assert!(store.get(&active.id).await.unwrap().unwrap().saved);
    assert!(!store.get(&stopped.id).await.unwrap().unwrap().saved);

    let edited = store
        .update(
            &active.id,
            JobPatch {
                command: Some("echo changed;".to_string()),
                ..JobPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(!edited.saved);
    assert!(!store.get(&active.id).await.unwrap().unwrap().saved);

    sandbox.installer.publish(None).await.unwrap();
    assert!(store.get(&active.id).await.unwrap().unwrap().saved);

    let paused = store.set_stopped(&active.id, true).await.unwrap();
    assert!(!paused.saved);

    let report = sandbox.installer.publish(None).await.unwrap();
    assert!(report.included.is_empty());
    assert!(!store.get(&active.id).await.unwrap().unwrap().saved);
    assert_eq!(sandbox.schedule_text(), "");
}

/// Test: A job edited while a publish runs stays unsaved.
#[tokio::test]
async fn test_edit_during_publish_stays_unsaved() {
    let sandbox = Sandbox::new(&["sh", "-c", "sleep 0.3", "reload"]);
    let job = sandbox
        .store
        .create(JobDraft::new("echo v1;", "@hourly"))
        .await
        .unwrap();

    let publishing = {
        let installer = sandbox.installer.clone();
        tokio::spawn(async move { installer.publish(None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    sandbox
        .store
        .update(
            &job.id,
            JobPatch {
                command: Some("echo v2;".to_string()),
                ..JobPatch::default()
            },
        )
        .await
        .unwrap();

    let report = publishing.await.unwrap().unwrap();
    assert_eq!(report.included, vec![job.id.clone()]);
    assert_eq!(report.marked, 0);

    let stored = sandbox.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.command, "echo v2;");
    assert!(!stored.saved);
}

/// Test: A failing reload aborts before jobs are marked, leaving written files.
#[tokio::test]
async fn test_failed_reload_aborts_publish() {
    let sandbox = Sandbox::new(&["sh", "-c", "echo 'errors in crontab file' >&2; exit 1", "reload"]);
    let job = sandbox
        .store
        .create(JobDraft::new("echo hi;", "@daily"))
        .await
        .unwrap();

    let err = sandbox.installer.publish(None).await.unwrap_err();

    match err {
        PublishError::Step { step, reason } => {
            assert_eq!(step, PublishStep::ReloadHostScheduler);
            assert!(reason.contains("errors in crontab file"));
        }
        other => panic!("expected step failure, got {:?}", other),
    }
    assert!(sandbox.schedule_file().exists());
    assert!(!sandbox.store.get(&job.id).await.unwrap().unwrap().saved);
}

/// Test: Publishing an unchanged job set twice writes identical files.
#[tokio::test]
async fn test_republish_is_idempotent() {
    let sandbox = Sandbox::new(&["true"]);
    sandbox
        .store
        .create(JobDraft::new("echo a;", "15 4 * * 1-5").with_hook("logger -t a"))
        .await
        .unwrap();
    sandbox
        .store
        .create(JobDraft::new("echo b;", "@weekly").with_logging(true))
        .await
        .unwrap();

    sandbox.installer.publish(Some("PATH=/usr/bin:/bin")).await.unwrap();
    let first = sandbox.schedule_text();

    sandbox.installer.publish(None).await.unwrap();
    assert_eq!(sandbox.schedule_text(), first);
}
