//! Settings error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or checking settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML document did not match the settings schema.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// As [`ConfigError::YamlError`], for a named file.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `timezone` is not an IANA zone name.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    /// A path holds a character that cannot appear in a crontab line.
    #[error("{field} contains {character:?}")]
    UnsafePath { field: &'static str, character: char },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required value is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
