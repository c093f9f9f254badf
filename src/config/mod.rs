//! Configuration loading and parsing.
//!
//! This module provides YAML-based settings for storage, the compiled file
//! locations and the host commands publish runs.

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{PathsConfig, Settings, TimeoutConfig};
