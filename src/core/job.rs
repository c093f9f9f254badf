//! Job records.
//!
//! A [`Job`] is the persisted definition of one periodic task. It carries no
//! behavior of its own: the validation module decides whether its fields are
//! acceptable, the compiler turns it into a crontab line and the store owns
//! its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::JobId;

/// Mail notification settings for a job.
///
/// The dispatcher reads `onError`/`onSuccess` and any transport options it
/// understands; unknown keys are preserved as-is. An empty object disables
/// notification entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailing {
    /// Notify when the job writes to stderr or exits non-zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<bool>,
    /// Notify after every successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<bool>,
    /// Transport and message options passed through to the dispatcher.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Mailing {
    /// Whether no notification is configured.
    pub fn is_empty(&self) -> bool {
        self.on_error.is_none() && self.on_success.is_none() && self.options.is_empty()
    }
}

/// A periodic job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier, assigned at creation.
    pub id: JobId,
    /// Display label; may be empty.
    #[serde(default)]
    pub name: String,
    /// Shell fragment to run.
    pub command: String,
    /// Macro or 5/6-field cron expression.
    pub schedule: String,
    /// Stopped jobs are kept but not installed.
    #[serde(default)]
    pub stopped: bool,
    /// Append captured output to persistent log files.
    #[serde(default)]
    pub logging: bool,
    /// Mail notification settings.
    #[serde(default)]
    pub mailing: Mailing,
    /// Command fed the job's stdout after each run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
    /// When the job was created.
    pub created: DateTime<Utc>,
    /// When the job was last written.
    pub last_modified: DateTime<Utc>,
    /// True only while this exact revision is installed on the host.
    #[serde(default)]
    pub saved: bool,
}

impl Job {
    /// Build a new, unsaved job from a draft.
    pub fn from_draft(id: JobId, draft: JobDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            command: draft.command,
            schedule: draft.schedule,
            stopped: draft.stopped,
            logging: draft.logging,
            mailing: draft.mailing,
            hook: draft.hook,
            created: now,
            last_modified: now,
            saved: false,
        }
    }

    /// Name to show to users, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }

    /// Whether the compiler should emit a line for this job.
    pub fn is_active(&self) -> bool {
        !self.stopped
    }
}

/// Fields supplied by a caller creating a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    #[serde(default)]
    pub name: String,
    pub command: String,
    pub schedule: String,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub logging: bool,
    #[serde(default)]
    pub mailing: Mailing,
    #[serde(default)]
    pub hook: Option<String>,
}

impl JobDraft {
    /// Create a draft with a command and schedule.
    pub fn new(command: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            schedule: schedule.into(),
            ..Self::default()
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the stopped flag.
    pub fn with_stopped(mut self, stopped: bool) -> Self {
        self.stopped = stopped;
        self
    }

    /// Enable or disable output logging.
    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Set mail notification settings.
    pub fn with_mailing(mut self, mailing: Mailing) -> Self {
        self.mailing = mailing;
        self
    }

    /// Set the post-execution hook.
    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hook = Some(hook.into());
        self
    }
}

/// A partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub stopped: Option<bool>,
    #[serde(default)]
    pub logging: Option<bool>,
    #[serde(default)]
    pub mailing: Option<Mailing>,
    /// `Some(None)` clears the hook.
    #[serde(default)]
    pub hook: Option<Option<String>>,
}

impl JobPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to a job, stamping it modified and unsaved.
    pub fn apply(self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            job.name = name;
        }
        if let Some(command) = self.command {
            job.command = command;
        }
        if let Some(schedule) = self.schedule {
            job.schedule = schedule;
        }
        if let Some(stopped) = self.stopped {
            job.stopped = stopped;
        }
        if let Some(logging) = self.logging {
            job.logging = logging;
        }
        if let Some(mailing) = self.mailing {
            job.mailing = mailing;
        }
        if let Some(hook) = self.hook {
            job.hook = hook;
        }
        job.last_modified = now;
        job.saved = false;
    }
}
