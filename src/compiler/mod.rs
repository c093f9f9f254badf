//! Projection of stored jobs into crontab text.
//!
//! Each active job becomes one line: its schedule followed by a shell
//! fragment that runs the command while teeing stdout and stderr into
//! per-job capture files, then optionally appends those captures to log
//! files, feeds stdout to a hook and calls the mail dispatcher.
//!
//! Compilation is pure. The same jobs and environment always produce the
//! same bytes.

pub mod import;

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::environment::Environment;
use crate::core::job::Job;
use crate::core::schedule::Schedule;
use crate::core::types::JobId;

/// A job left out of the compiled text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} skipped: {reason}")]
pub struct CompileSkip {
    /// The skipped job.
    pub job_id: JobId,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of compiling a job set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSchedule {
    /// Full crontab text.
    pub text: String,
    /// Jobs that have a line in `text`, in output order.
    pub included: Vec<JobId>,
    /// Active jobs whose schedule no longer parses.
    pub skipped: Vec<CompileSkip>,
}

/// Which capture stream a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Renders jobs into crontab lines.
#[derive(Debug, Clone)]
pub struct Compiler {
    capture_dir: PathBuf,
    log_dir: PathBuf,
    mailer_command: Option<String>,
    timezone: String,
}

impl Compiler {
    /// Create a compiler writing captures under `capture_dir` and logs under
    /// `log_dir`.
    pub fn new(capture_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            capture_dir: capture_dir.into(),
            log_dir: log_dir.into(),
            mailer_command: None,
            timezone: "UTC".to_string(),
        }
    }

    /// Set the mail dispatcher invoked for jobs with mailing configured.
    pub fn with_mailer(mut self, command: impl Into<String>) -> Self {
        self.mailer_command = Some(command.into());
        self
    }

    /// Set the timezone used when re-checking schedules.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Directory holding capture files.
    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    /// Directory holding log files.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Capture file for one of a job's output streams.
    pub fn capture_path(&self, id: &JobId, stream: Stream) -> PathBuf {
        let suffix = match stream {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        };
        self.capture_dir.join(format!("{}.{}", id, suffix))
    }

    /// Log file that accumulates a job's stderr captures.
    pub fn log_path(&self, id: &JobId) -> PathBuf {
        self.log_dir.join(format!("{}.log", id))
    }

    /// Log file that accumulates a job's stdout captures.
    pub fn stdout_log_path(&self, id: &JobId) -> PathBuf {
        self.log_dir.join(format!("{}.stdout.log", id))
    }

    /// Split active jobs into those whose schedule still parses and those
    /// that must be skipped. Stopped jobs are dropped silently.
    pub fn partition<'a>(&self, jobs: &'a [Job]) -> (Vec<&'a Job>, Vec<CompileSkip>) {
        let mut included = Vec::new();
        let mut skipped = Vec::new();

        for job in jobs.iter().filter(|job| job.is_active()) {
            match Schedule::with_timezone(job.schedule.as_str(), self.timezone.as_str()) {
                Ok(_) => included.push(job),
                Err(e) => {
                    tracing::warn!(job_id = %job.id, schedule = %job.schedule, error = %e, "skipping job with invalid schedule");
                    skipped.push(CompileSkip {
                        job_id: job.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        (included, skipped)
    }

    /// Render full crontab text for jobs already filtered by [`partition`](Self::partition).
    pub fn render(&self, jobs: &[&Job], env: &Environment) -> String {
        let mut text = String::new();

        if !env.as_str().trim().is_empty() {
            text.push_str(env.as_str());
            text.push('\n');
        }

        for job in jobs {
            text.push_str(job.schedule.trim());
            text.push(' ');
            text.push_str(&self.compile_job(job, env));
            text.push('\n');
        }

        text
    }

    /// Compile a job set in the order given.
    pub fn compile(&self, jobs: &[Job], env: &Environment) -> CompiledSchedule {
        let (included, skipped) = self.partition(jobs);
        let text = self.render(&included, env);

        CompiledSchedule {
            text,
            included: included.iter().map(|job| job.id.clone()).collect(),
            skipped,
        }
    }

    /// Build the shell fragment for a single job, without its schedule.
    pub fn compile_job(&self, job: &Job, env: &Environment) -> String {
        let stdout = path_arg(&self.capture_path(&job.id, Stream::Stdout));
        let stderr = path_arg(&self.capture_path(&job.id, Stream::Stderr));

        let inline_env = env.inline();
        let mut command = if inline_env.is_empty() {
            job.command.trim().to_string()
        } else {
            format!("({}; ({}))", inline_env, job.command.trim())
        };
        if !command.ends_with(';') && !command.ends_with('&') {
            command.push(';');
        }

        let mut fragment = format!(
            "((({{ {} }} | tee {}) 3>&1 1>&2 2>&3 | tee {}) 3>&1 1>&2 2>&3)",
            command, stdout, stderr
        );

        if job.logging {
            let log = path_arg(&self.log_path(&job.id));
            let stdout_log = path_arg(&self.stdout_log_path(&job.id));
            fragment.push_str(&format!(
                "; if test -f {err}; then date >> {log}; cat {err} >> {log}; fi; if test -f {out}; then date >> {out_log}; cat {out} >> {out_log}; fi",
                err = stderr,
                out = stdout,
                log = log,
                out_log = stdout_log,
            ));
        }

        if let Some(hook) = job.hook.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            fragment.push_str(&format!("; if test -f {}; then {} < {}; fi", stdout, hook, stdout));
        }

        if !job.mailing.is_empty() {
            match &self.mailer_command {
                Some(mailer) => fragment.push_str(&format!(
                    "; {} {} {} {}",
                    mailer,
                    shell_quote(job.id.as_str()),
                    stdout,
                    stderr
                )),
                None => {
                    tracing::debug!(job_id = %job.id, "mailing configured but no mailer command set");
                }
            }
        }

        fragment
    }
}

fn path_arg(path: &Path) -> String {
    shell_quote(&path.to_string_lossy()).into_owned()
}

/// Quote a word for `sh`, leaving it bare when it only holds safe characters.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '@' | '+' | ',' | '='));

    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', "'\\''")))
    }
}
