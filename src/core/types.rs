//! Core identifier types.
//!
//! Type-safe identifiers for jobs and recorded runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
///
/// Generated identifiers are simple-form UUIDs (32 lowercase hex digits), which
/// keeps them safe to splice into capture file paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Unique identifier for a recorded job run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl JobId {
    /// Create a JobId from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random JobId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_creation() {
        let job_id = JobId::new("nightly_backup");
        assert_eq!(job_id.as_str(), "nightly_backup");
    }

    #[test]
    fn test_generated_job_ids_are_unique_hex() {
        let a = JobId::generate();
        let b = JobId::generate();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_id_display() {
        let job_id = JobId::new("rotate_logs");
        assert_eq!(format!("{}", job_id), "rotate_logs");
    }

    #[test]
    fn test_job_id_from_str() {
        let id1: JobId = "my_job".into();
        let id2 = JobId::new("my_job");
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_run_id_is_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_run_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let run_id = RunId::from_uuid(uuid);

        assert_eq!(run_id.as_uuid(), &uuid);
    }

    #[test]
    fn test_job_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&JobId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
