//! Compile and import round-trip tests.
//!
//! Tests that compiled crontab text can be read back into the jobs it was
//! built from.

use crate::common::compiler_in;
use cronkeep::{
    Environment, InMemoryStorage, JobDraft, JobStore, Mailing, Stream, parse_crontab,
};
use std::sync::Arc;
use tempfile::TempDir;

async fn seeded_store() -> JobStore {
    let store = JobStore::new(Arc::new(InMemoryStorage::new()));
    let drafts = vec![
        JobDraft::new("/usr/local/bin/backup.sh", "0 2 * * *").with_logging(true),
        JobDraft::new("echo tick", "*/15 * * * *"),
        JobDraft::new("echo precise;", "30 0 6 * * *"),
        JobDraft::new("find /tmp/app -mtime +7 -delete &", "@weekly"),
        JobDraft::new("date", "0 9 1-7 * mon").with_hook("logger -t first-monday"),
        JobDraft::new("echo paused;", "@hourly").with_stopped(true),
        JobDraft::new("report --daily", "@midnight").with_mailing(Mailing {
            on_error: Some(true),
            ..Mailing::default()
        }),
    ];
    for draft in drafts {
        store.create(draft).await.unwrap();
    }
    store
}

/// Test: Importing compiled text reproduces each job's schedule and fragment.
#[tokio::test]
async fn test_compile_then_import() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler_in(&dir).with_mailer("/usr/local/bin/cronkeep-mailer");
    let store = seeded_store().await;
    let env = Environment::new("SHELL=/bin/sh\nMAILTO=ops@example.com");

    let jobs = store.list().await.unwrap();
    let compiled = compiler.compile(&jobs, &env);
    assert_eq!(compiled.included.len(), 6);

    let imported = parse_crontab(&compiled.text);
    assert!(imported.unrecognized.is_empty());
    assert_eq!(imported.environment.as_str(), env.as_str());
    assert_eq!(imported.drafts.len(), compiled.included.len());

    let active: Vec<_> = jobs.iter().filter(|job| !job.stopped).collect();
    for (job, draft) in active.iter().zip(&imported.drafts) {
        assert_eq!(draft.schedule, job.schedule);
        assert_eq!(draft.command, compiler.compile_job(job, &env));

        let stdout = compiler.capture_path(&job.id, Stream::Stdout);
        let stderr = compiler.capture_path(&job.id, Stream::Stderr);
        assert!(draft.command.contains(stdout.to_string_lossy().as_ref()));
        assert!(draft.command.contains(stderr.to_string_lossy().as_ref()));

        for other in jobs.iter().filter(|other| other.id != job.id) {
            assert!(!draft.command.contains(other.id.as_str()));
        }
    }
}

/// Test: Compiling an unchanged job set twice gives identical text.
#[tokio::test]
async fn test_compile_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler_in(&dir);
    let store = seeded_store().await;
    let env = Environment::new("PATH=/usr/bin:/bin");

    let first = compiler.compile(&store.list().await.unwrap(), &env);
    let second = compiler.compile(&store.list().await.unwrap(), &env);

    assert_eq!(first.text, second.text);
    assert_eq!(first.included, second.included);
}

/// Test: A hand-written crontab imports into valid drafts.
#[tokio::test]
async fn test_import_handwritten_crontab() {
    let text = "\
# maintenance
SHELL=/bin/bash
PATH=/usr/local/bin:/usr/bin

0 3 * * *    /usr/local/bin/rotate-logs   --keep 7
@reboot /usr/local/bin/warm-cache
not a job line
*/10 * * * * curl -fsS https://status.example.com/ping > /dev/null
";
    let imported = parse_crontab(text);

    assert_eq!(imported.unrecognized, vec![7]);
    assert_eq!(imported.environment.assignment_lines().count(), 2);
    assert_eq!(imported.drafts.len(), 3);
    assert_eq!(imported.drafts[0].schedule, "0 3 * * *");
    assert_eq!(imported.drafts[0].command, "/usr/local/bin/rotate-logs   --keep 7");
    assert_eq!(imported.drafts[1].schedule, "@reboot");

    let store = JobStore::new(Arc::new(InMemoryStorage::new()));
    store.set_environment(imported.environment.as_str()).await.unwrap();
    for draft in imported.drafts {
        store.create(draft).await.unwrap();
    }
    assert_eq!(store.list().await.unwrap().len(), 3);
}

/// Test: Running compiled fragments splits each job's streams into its own captures.
#[tokio::test]
async fn test_compiled_fragments_capture_their_own_streams() {
    let dir = TempDir::new().unwrap();
    let compiler = compiler_in(&dir);
    std::fs::create_dir_all(compiler.capture_dir()).unwrap();

    let store = JobStore::new(Arc::new(InMemoryStorage::new()));
    store.set_environment("GREETING=\"hello there\"").await.unwrap();
    let noisy = store
        .create(JobDraft::new("echo \"$GREETING\"; echo err >&2", "@hourly"))
        .await
        .unwrap();
    let quiet = store
        .create(JobDraft::new("echo other", "@daily"))
        .await
        .unwrap();
    let env = Environment::new(store.environment().await.unwrap());

    let run = |fragment: String| {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(fragment)
            .output()
            .unwrap()
    };
    let read = |path: std::path::PathBuf| std::fs::read_to_string(path).unwrap();

    let noisy_out = run(compiler.compile_job(&noisy, &env));
    let quiet_out = run(compiler.compile_job(&quiet, &env));

    assert!(noisy_out.status.success());
    assert_eq!(String::from_utf8_lossy(&noisy_out.stdout), "hello there\n");
    assert_eq!(String::from_utf8_lossy(&noisy_out.stderr), "err\n");
    assert_eq!(read(compiler.capture_path(&noisy.id, Stream::Stdout)), "hello there\n");
    assert_eq!(read(compiler.capture_path(&noisy.id, Stream::Stderr)), "err\n");

    assert!(quiet_out.status.success());
    assert_eq!(String::from_utf8_lossy(&quiet_out.stdout), "other\n");
    assert!(quiet_out.stderr.is_empty());
    assert_eq!(read(compiler.capture_path(&quiet.id, Stream::Stdout)), "other\n");
    assert_eq!(read(compiler.capture_path(&quiet.id, Stream::Stderr)), "");
}
