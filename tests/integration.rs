//! Integration tests for cronkeep.
//!
//! These tests verify end-to-end scenarios including:
//! - Publishing stored jobs to a crontab file
//! - Store consistency across backends and the query cache
//! - Reading compiled crontabs back into jobs

mod common;

mod integration {
    pub mod publish;
    pub mod roundtrip;
    pub mod store;
}
