//! Field checks applied before anything is persisted.
//!
//! Every check returns `Result<(), ValidationError>`. The store runs them on
//! each create and update and surfaces the error unchanged, so messages are
//! written for end users.

mod command;

pub use command::{BlockedCategory, MAX_COMMAND_LEN, blocked_category};

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::core::environment::Environment;
use crate::core::job::{Job, JobDraft};
use crate::core::schedule::{Schedule, ScheduleError};

/// Maximum job name length, in characters.
pub const MAX_NAME_LEN: usize = 100;

static ASSIGNMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").ok());

/// Errors raised by field validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Name too long or has disallowed characters.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Command is empty or whitespace.
    #[error("command is empty")]
    EmptyCommand,

    /// Command spans more than one line.
    #[error("command must be a single line")]
    MultilineCommand,

    /// Command exceeds the length limit.
    #[error("command exceeds {max} characters (got {len})")]
    CommandTooLong { len: usize, max: usize },

    /// Command matches a deny-list entry.
    #[error("command matches blocked pattern: {0}")]
    BlockedCommand(BlockedCategory),

    /// Hook failed the command check.
    #[error("invalid hook: {0}")]
    InvalidHook(Box<ValidationError>),

    /// Schedule does not parse or never fires.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// An environment line is not a plain assignment.
    #[error("environment line {line}: {reason}")]
    InvalidEnvironment { line: usize, reason: String },

    /// Environment blob matches a deny-list entry.
    #[error("environment matches blocked pattern: {0}")]
    BlockedEnvironment(BlockedCategory),
}

/// Check a display name.
pub fn check_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Ok(());
    }

    let len = name.chars().count();
    if len > MAX_NAME_LEN {
        return Err(ValidationError::InvalidName(format!(
            "longer than {} characters",
            MAX_NAME_LEN
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '-' | '.')))
    {
        return Err(ValidationError::InvalidName(format!(
            "character {:?} is not allowed",
            bad
        )));
    }

    Ok(())
}

/// Check a command against the length limit and the deny-list.
pub fn check_command(command: &str) -> Result<(), ValidationError> {
    if command.trim().is_empty() {
        return Err(ValidationError::EmptyCommand);
    }

    if command.contains(['\n', '\r']) {
        return Err(ValidationError::MultilineCommand);
    }

    let len = command.chars().count();
    if len > MAX_COMMAND_LEN {
        return Err(ValidationError::CommandTooLong {
            len,
            max: MAX_COMMAND_LEN,
        });
    }

    match blocked_category(command) {
        Some(category) => Err(ValidationError::BlockedCommand(category)),
        None => Ok(()),
    }
}

/// Check an optional post-execution hook. It is spliced into the compiled
/// fragment, so it gets the same scan as the command.
pub fn check_hook(hook: Option<&str>) -> Result<(), ValidationError> {
    match hook {
        None => Ok(()),
        Some(hook) => check_command(hook).map_err(|e| ValidationError::InvalidHook(Box::new(e))),
    }
}

/// Check a schedule parses and, unless it is `@reboot`, fires at least once
/// more in `timezone`.
pub fn check_schedule(expression: &str, timezone: &str) -> Result<(), ValidationError> {
    let schedule = Schedule::with_timezone(expression, timezone)?;
    if !schedule.is_reboot() {
        schedule.next()?;
    }
    Ok(())
}

/// Check an environment blob.
///
/// Each non-blank, non-comment line must be a `NAME=value` assignment whose
/// value carries no shell control characters, since the blob is also spliced
/// in front of every job command. A value is either a single bare word or
/// wrapped whole in matching quotes.
pub fn check_environment(env: &Environment) -> Result<(), ValidationError> {
    for (index, raw) in env.as_str().lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let is_assignment = ASSIGNMENT.as_ref().is_some_and(|re| re.is_match(line));
        if !is_assignment {
            return Err(ValidationError::InvalidEnvironment {
                line: index + 1,
                reason: "expected NAME=value".to_string(),
            });
        }

        let value = line.split_once('=').map(|(_, v)| v).unwrap_or_default();
        if let Some(bad) = value
            .chars()
            .find(|c| matches!(c, ';' | '&' | '|' | '<' | '>' | '`'))
        {
            return Err(ValidationError::InvalidEnvironment {
                line: index + 1,
                reason: format!("value contains {:?}", bad),
            });
        }
        if value.contains("$(") {
            return Err(ValidationError::InvalidEnvironment {
                line: index + 1,
                reason: "value contains command substitution".to_string(),
            });
        }
        check_value_words(value).map_err(|reason| ValidationError::InvalidEnvironment {
            line: index + 1,
            reason,
        })?;
    }

    match blocked_category(env.as_str()) {
        Some(category) => Err(ValidationError::BlockedEnvironment(category)),
        None => Ok(()),
    }
}

/// A value must stay one shell word when the assignments are inlined.
fn check_value_words(value: &str) -> Result<(), String> {
    if value.chars().any(char::is_control) {
        return Err("value contains a control character".to_string());
    }

    let quote = value.chars().next().filter(|c| matches!(c, '"' | '\''));
    match quote {
        Some(q) if value.len() >= 2 && value.ends_with(q) => {
            let inner = &value[1..value.len() - 1];
            if inner.contains(q) {
                return Err(format!("value has an unbalanced {:?}", q));
            }
            if q == '"' && inner.contains('\\') {
                return Err("value contains a backslash".to_string());
            }
            Ok(())
        }
        Some(q) => Err(format!("value has an unbalanced {:?}", q)),
        None => {
            if value.chars().any(char::is_whitespace) {
                return Err("unquoted whitespace in value".to_string());
            }
            if let Some(bad) = value.chars().find(|c| matches!(c, '"' | '\'' | '\\')) {
                return Err(format!("value contains {:?} outside quotes", bad));
            }
            Ok(())
        }
    }
}

/// Runs every job field check with a fixed timezone.
#[derive(Debug, Clone)]
pub struct Validator {
    timezone: String,
}

impl Validator {
    /// Create a validator evaluating schedules in UTC.
    pub fn new() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }

    /// Evaluate schedules in a different timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Timezone used for occurrence checks.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    /// Check a schedule in this validator's timezone.
    pub fn check_schedule(&self, expression: &str) -> Result<(), ValidationError> {
        check_schedule(expression, &self.timezone)
    }

    /// Check every field of a draft.
    pub fn validate_draft(&self, draft: &JobDraft) -> Result<(), ValidationError> {
        self.check_fields(&draft.name, &draft.command, &draft.schedule, draft.hook.as_deref())
    }

    /// Check every field of a job, typically after applying a patch.
    pub fn validate_job(&self, job: &Job) -> Result<(), ValidationError> {
        self.check_fields(&job.name, &job.command, &job.schedule, job.hook.as_deref())
    }

    fn check_fields(
        &self,
        name: &str,
        command: &str,
        schedule: &str,
        hook: Option<&str>,
    ) -> Result<(), ValidationError> {
        check_name(name)?;
        check_command(command)?;
        self.check_schedule(schedule)?;
        check_hook(hook)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
