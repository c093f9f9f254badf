//! Environment blob shared by every installed job.
//!
//! The blob is free text with one `NAME=value` assignment per line. Blank
//! lines and `#` comments are allowed. It is written verbatim at the top of
//! the schedule file and also spliced in front of each job command, where it
//! has to fit on a single line.

use serde::{Deserialize, Serialize};

/// Environment assignments prefixed to the compiled schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    text: String,
}

impl Environment {
    /// Wrap raw blob text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The blob exactly as stored.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when the blob holds no assignments.
    pub fn is_blank(&self) -> bool {
        self.assignment_lines().next().is_none()
    }

    /// Non-blank, non-comment lines, trimmed.
    pub fn assignment_lines(&self) -> impl Iterator<Item = &str> {
        self.text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
    }

    /// Assignments collapsed onto one line, separated by single spaces.
    ///
    /// Only parsed assignments are kept. A `#` comment would swallow the job
    /// command, and any other line would run as a command of its own.
    pub fn inline(&self) -> String {
        self.vars()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parsed `(name, value)` pairs, skipping lines that are not assignments.
    pub fn vars(&self) -> Vec<(&str, &str)> {
        self.assignment_lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value))
            .collect()
    }
}

impl From<String> for Environment {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Environment {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}
