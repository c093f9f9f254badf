//! Common test utilities shared across integration tests.

use cronkeep::{Compiler, InMemoryStorage, Installer, JobStore, ReloadCommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A store and installer writing into a scratch directory.
pub struct Sandbox {
    pub dir: TempDir,
    pub store: Arc<JobStore>,
    pub installer: Arc<Installer>,
}

impl Sandbox {
    /// Build a sandbox whose reload step runs `reload` with the schedule
    /// file path appended.
    pub fn new(reload: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::new(Arc::new(InMemoryStorage::new())));
        let installer = Arc::new(Installer::new(
            store.clone(),
            compiler_in(&dir),
            reload_command(reload),
            dir.path().join("crontabs").join("crontab"),
            dir.path().join("crontabs").join("env.db"),
        ));
        Self {
            dir,
            store,
            installer,
        }
    }

    /// Path of the compiled schedule file.
    pub fn schedule_file(&self) -> PathBuf {
        self.dir.path().join("crontabs").join("crontab")
    }

    /// Contents of the compiled schedule file.
    pub fn schedule_text(&self) -> String {
        std::fs::read_to_string(self.schedule_file()).unwrap()
    }
}

/// A compiler with capture and log directories under `dir`.
pub fn compiler_in(dir: &TempDir) -> Compiler {
    Compiler::new(dir.path().join("crontabs"), dir.path().join("logs"))
}

/// Build a reload command from string parts.
pub fn reload_command(parts: &[&str]) -> ReloadCommand {
    let argv: Vec<String> = parts.iter().map(|s| s.to_string()).collect();
    ReloadCommand::from_argv(&argv, Duration::from_secs(10)).unwrap()
}
