//! cronkeep - validated job records compiled into host crontab schedules.
//!
//! Jobs live in a [`JobStore`] backed by SQLite, Redis or memory. The
//! [`Compiler`] renders active jobs into crontab text that captures each
//! run's output, and the [`Installer`] writes that text and reloads the host
//! scheduler.

pub mod compiler;
pub mod config;
pub mod core;
pub mod installer;
pub mod storage;
pub mod validation;

pub use compiler::import::{ImportedCrontab, parse_crontab};
pub use compiler::{CompileSkip, CompiledSchedule, Compiler, Stream};
pub use config::{ConfigError, Settings};
pub use core::environment::Environment;
pub use core::job::{Job, JobDraft, JobPatch, Mailing};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::types::{JobId, RunId};
pub use installer::{Installer, PublishError, PublishReport, PublishStep, ReloadCommand, ReloadError};
pub use storage::{
    BackupDescriptor, CacheConfig, ExecutionRecord, InMemoryStorage, JobStore, SavedMark, Storage,
    StorageConfig, StorageError, StoreError,
};
pub use validation::{BlockedCategory, ValidationError, Validator};
