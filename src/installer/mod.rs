//! Publishing the stored jobs to the host scheduler.
//!
//! A publish runs these steps in order, stopping at the first failure:
//!
//! 1. `COLLECT` - read the job list and environment (storing a supplied
//!    environment first)
//! 2. `VALIDATE-SNAPSHOT` - re-parse each active schedule, skipping failures
//! 3. `COMPILE` - render crontab text
//! 4. `WRITE-ENV-FILE` / `WRITE-SCHEDULE-FILE` - write the fixed output files
//! 5. `RELOAD-HOST-SCHEDULER` - run the reload command
//! 6. `MARK-SAVED` - flag the installed job revisions as saved
//!
//! Publishes are serialized. A failure after the files are written leaves
//! them in place; nothing is rolled back.

mod reload;

pub use reload::{ReloadCommand, ReloadError};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::compiler::{CompileSkip, CompiledSchedule, Compiler};
use crate::config::Settings;
use crate::core::environment::Environment;
use crate::core::types::JobId;
use crate::storage::{JobStore, SavedMark, StoreError};
use crate::validation::ValidationError;

/// Steps of the publish protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishStep {
    Collect,
    ValidateSnapshot,
    Compile,
    WriteEnvFile,
    WriteScheduleFile,
    ReloadHostScheduler,
    MarkSaved,
}

impl PublishStep {
    /// Protocol name of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStep::Collect => "COLLECT",
            PublishStep::ValidateSnapshot => "VALIDATE-SNAPSHOT",
            PublishStep::Compile => "COMPILE",
            PublishStep::WriteEnvFile => "WRITE-ENV-FILE",
            PublishStep::WriteScheduleFile => "WRITE-SCHEDULE-FILE",
            PublishStep::ReloadHostScheduler => "RELOAD-HOST-SCHEDULER",
            PublishStep::MarkSaved => "MARK-SAVED",
        }
    }
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a publish.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Another publish holds the lock.
    #[error("publish already in progress")]
    InProgress,

    /// Reading from the store failed.
    #[error(transparent)]
    Store(StoreError),

    /// A supplied environment blob was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A step after collection failed.
    #[error("publish failed at {step}: {reason}")]
    Step { step: PublishStep, reason: String },
}

impl From<StoreError> for PublishError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(v) => PublishError::Validation(v),
            other => PublishError::Store(other),
        }
    }
}

impl PublishError {
    fn step(step: PublishStep, reason: impl fmt::Display) -> Self {
        PublishError::Step {
            step,
            reason: reason.to_string(),
        }
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Jobs written to the schedule file, in file order.
    pub included: Vec<JobId>,
    /// Active jobs left out because their schedule no longer parses.
    pub skipped: Vec<CompileSkip>,
    /// Where the schedule was written.
    pub schedule_path: PathBuf,
    /// Where the environment was written.
    pub env_path: PathBuf,
    /// How many jobs were flagged saved; lower than `included.len()` when
    /// jobs were edited during the publish.
    pub marked: usize,
}

/// Compiles and installs the stored jobs.
pub struct Installer {
    store: Arc<JobStore>,
    compiler: Compiler,
    reload: ReloadCommand,
    schedule_file: PathBuf,
    env_file: PathBuf,
    lock: Mutex<()>,
}

impl Installer {
    /// Create an installer writing to the given files.
    pub fn new(
        store: Arc<JobStore>,
        compiler: Compiler,
        reload: ReloadCommand,
        schedule_file: impl Into<PathBuf>,
        env_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            compiler,
            reload,
            schedule_file: schedule_file.into(),
            env_file: env_file.into(),
            lock: Mutex::new(()),
        }
    }

    /// Build from settings.
    pub fn from_settings(store: Arc<JobStore>, settings: &Settings) -> Result<Self, ReloadError> {
        let mut compiler = Compiler::new(&settings.paths.capture_dir, &settings.paths.log_dir)
            .with_timezone(settings.timezone.as_str());
        if let Some(mailer) = &settings.mailer_command {
            compiler = compiler.with_mailer(mailer.as_str());
        }
        let reload = ReloadCommand::from_argv(&settings.reload_command, settings.timeouts.reload())?;

        Ok(Self::new(
            store,
            compiler,
            reload,
            &settings.paths.schedule_file,
            &settings.paths.env_file,
        ))
    }

    /// The compiler used for publishing.
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Compile the current store contents without writing anything.
    pub async fn preview(&self) -> Result<CompiledSchedule, PublishError> {
        let jobs = self.store.list().await?;
        let env = Environment::new(self.store.environment().await?);
        Ok(self.compiler.compile(&jobs, &env))
    }

    /// Publish, waiting for any publish already running.
    pub async fn publish(&self, env: Option<&str>) -> Result<PublishReport, PublishError> {
        let _guard = self.lock.lock().await;
        self.run(env).await
    }

    /// Publish, or fail with [`PublishError::InProgress`] if one is running.
    pub async fn try_publish(&self, env: Option<&str>) -> Result<PublishReport, PublishError> {
        let _guard = self.lock.try_lock().map_err(|_| PublishError::InProgress)?;
        self.run(env).await
    }

    async fn run(&self, env: Option<&str>) -> Result<PublishReport, PublishError> {
        let start = Instant::now();

        // COLLECT
        if let Some(text) = env {
            self.store.set_environment(text).await?;
        }
        let jobs = self.store.list().await?;
        let environment = Environment::new(self.store.environment().await?);
        info!(step = %PublishStep::Collect, jobs = jobs.len(), "publish step");

        // VALIDATE-SNAPSHOT
        let (included, skipped) = self.compiler.partition(&jobs);
        info!(
            step = %PublishStep::ValidateSnapshot,
            included = included.len(),
            skipped = skipped.len(),
            "publish step"
        );

        // COMPILE
        let text = self.compiler.render(&included, &environment);
        info!(step = %PublishStep::Compile, bytes = text.len(), "publish step");

        // WRITE-ENV-FILE
        write_file(&self.env_file, environment.as_str())
            .await
            .map_err(|e| PublishError::step(PublishStep::WriteEnvFile, e))?;
        info!(step = %PublishStep::WriteEnvFile, path = %self.env_file.display(), "publish step");

        // WRITE-SCHEDULE-FILE
        for dir in [self.compiler.capture_dir(), self.compiler.log_dir()] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PublishError::step(PublishStep::WriteScheduleFile, format!("{}: {}", dir.display(), e)))?;
        }
        write_file(&self.schedule_file, &text)
            .await
            .map_err(|e| PublishError::step(PublishStep::WriteScheduleFile, e))?;
        info!(step = %PublishStep::WriteScheduleFile, path = %self.schedule_file.display(), "publish step");

        // RELOAD-HOST-SCHEDULER
        match self.reload.run(&self.schedule_file).await {
            Ok(output) => {
                debug!(program = self.reload.program(), output = %output.trim(), "reload finished");
            }
            Err(e) => {
                warn!(step = %PublishStep::ReloadHostScheduler, error = %e, "publish aborted");
                return Err(PublishError::step(PublishStep::ReloadHostScheduler, e));
            }
        }
        info!(step = %PublishStep::ReloadHostScheduler, program = self.reload.program(), "publish step");

        // MARK-SAVED
        let marks: Vec<SavedMark> = included.iter().map(|job| SavedMark::for_job(job)).collect();
        let marked = self
            .store
            .mark_saved(&marks)
            .await
            .map_err(|e| PublishError::step(PublishStep::MarkSaved, e))?;
        if marked < marks.len() {
            warn!(
                step = %PublishStep::MarkSaved,
                marked,
                expected = marks.len(),
                "jobs changed during publish were left unsaved"
            );
        }
        info!(
            step = %PublishStep::MarkSaved,
            marked,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "publish complete"
        );

        Ok(PublishReport {
            included: included.iter().map(|job| job.id.clone()).collect(),
            skipped,
            schedule_path: self.schedule_file.clone(),
            env_path: self.env_file.clone(),
            marked,
        })
    }
}

/// Replace `path` atomically: write a sibling temp file, then rename it over
/// the target. Publishes are serialized, so the temp name can be fixed.
async fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_sibling(path)?;
    let result = async {
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

fn temp_sibling(path: &Path) -> std::io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(name);
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}
