//! Core domain types: jobs, schedules, the shared environment and identifiers.

pub mod environment;
pub mod job;
pub mod schedule;
pub mod types;
