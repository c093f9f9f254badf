//! Host scheduler reload command.
//!
//! The command is run directly, not through a shell, with the schedule file
//! path appended as its last argument. Success is judged by exit status.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Errors from running the reload command.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The argument vector was empty.
    #[error("reload command is empty")]
    Empty,

    /// The program could not be started.
    #[error("failed to run reload command: {0}")]
    ExecutionFailed(String),

    /// The command did not finish in time.
    #[error("reload command timed out after {0:?}")]
    Timeout(Duration),

    /// The command exited non-zero.
    #[error("reload command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },
}

/// A program plus fixed arguments.
#[derive(Debug, Clone)]
pub struct ReloadCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ReloadCommand {
    /// Build from an argument vector such as `["crontab"]`.
    pub fn from_argv(argv: &[String], timeout: Duration) -> Result<Self, ReloadError> {
        let (program, args) = argv.split_first().ok_or(ReloadError::Empty)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    /// The program that will be run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run against `schedule_file` and return captured stdout.
    pub async fn run(&self, schedule_file: &Path) -> Result<String, ReloadError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(schedule_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ReloadError::Timeout(self.timeout))?
            .map_err(|e| ReloadError::ExecutionFailed(e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ReloadError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
