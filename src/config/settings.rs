//! Runtime settings loaded from YAML.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use crate::storage::{CacheConfig, StorageConfig};

/// Top-level settings file (`cronkeep.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Primary store.
    pub storage: StorageConfig,
    /// Optional second store receiving every write.
    pub legacy_mirror: Option<StorageConfig>,
    /// Query cache sizing.
    pub cache: CacheConfig,
    /// Files written by publish.
    pub paths: PathsConfig,
    /// Command that installs the schedule file; its path is appended.
    pub reload_command: Vec<String>,
    /// Mail dispatcher called with `<id> <stdout file> <stderr file>`.
    pub mailer_command: Option<String>,
    /// Timeouts for backend calls and the reload command.
    pub timeouts: TimeoutConfig,
    /// Timezone for occurrence checks and previews.
    pub timezone: String,
    /// Publish after every successful CLI mutation.
    pub autosave: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            legacy_mirror: None,
            cache: CacheConfig::default(),
            paths: PathsConfig::default(),
            reload_command: vec!["crontab".to_string()],
            mailer_command: None,
            timeouts: TimeoutConfig::default(),
            timezone: "UTC".to_string(),
            autosave: false,
        }
    }
}

/// Locations of capture, log and compiled files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Per-job `<id>.stdout` / `<id>.stderr` captures.
    pub capture_dir: PathBuf,
    /// Per-job `<id>.log` / `<id>.stdout.log` logs.
    pub log_dir: PathBuf,
    /// Compiled crontab text.
    pub schedule_file: PathBuf,
    /// Environment blob as last published.
    pub env_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let root = PathBuf::from("/var/lib/cronkeep");
        Self {
            capture_dir: root.join("crontabs"),
            log_dir: root.join("logs"),
            schedule_file: root.join("crontabs").join("crontab"),
            env_file: root.join("crontabs").join("env.db"),
        }
    }
}

/// Timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on each backend call.
    pub store_secs: u64,
    /// Bound on the reload command.
    pub reload_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_secs: 5,
            reload_secs: 30,
        }
    }
}

impl TimeoutConfig {
    /// Backend call timeout.
    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    /// Reload command timeout.
    pub fn reload(&self) -> Duration {
        Duration::from_secs(self.reload_secs)
    }
}

impl Settings {
    /// Load and validate settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate settings from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reload_command.is_empty() || self.reload_command[0].trim().is_empty() {
            return Err(ConfigError::MissingField("reload_command"));
        }

        if self.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::UnknownTimezone(self.timezone.clone()));
        }

        if self.timeouts.store_secs == 0 || self.timeouts.reload_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "timeouts must be at least one second".to_string(),
            ));
        }

        for (field, path) in [
            ("paths.capture_dir", &self.paths.capture_dir),
            ("paths.log_dir", &self.paths.log_dir),
            ("paths.schedule_file", &self.paths.schedule_file),
            ("paths.env_file", &self.paths.env_file),
        ] {
            check_path(field, path)?;
        }

        if let Some(mailer) = &self.mailer_command {
            if mailer.trim().is_empty() || mailer.contains(['\n', '%']) {
                return Err(ConfigError::InvalidConfig(
                    "mailer_command must be a single non-empty line without '%'".to_string(),
                ));
            }
        }

        if let StorageConfig::Redis { namespace, .. } = &self.storage {
            if namespace.is_empty() {
                return Err(ConfigError::MissingField("storage.namespace"));
            }
        }

        Ok(())
    }
}

/// Paths are spliced into crontab lines, partly inside double quotes, so
/// characters the shell or cron would interpret are refused.
fn check_path(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    if let Some(character) = text
        .chars()
        .find(|c| matches!(c, '"' | '$' | '`' | '\\' | '%' | '\n' | '\r'))
    {
        return Err(ConfigError::UnsafePath { field, character });
    }
    Ok(())
}
