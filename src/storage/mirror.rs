//! Secondary write targets.
//!
//! A mirror receives every successful mutation after the primary backend
//! has accepted it. Events are queued and applied in order by a background
//! task, so a slow or unreachable mirror never holds up the primary write.
//! Mirror failures are logged; they never undo or fail the primary write.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{SavedMark, Storage, StorageError};
use crate::core::job::Job;
use crate::core::types::JobId;

/// Events waiting for the mirror beyond this are dropped with a warning.
pub const MIRROR_QUEUE_CAPACITY: usize = 1024;

/// A mutation that reached the primary backend.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// A job was created or updated.
    JobWritten(Job),
    /// A job was deleted.
    JobDeleted(JobId),
    /// The environment blob was replaced.
    EnvironmentWritten(String),
    /// Jobs were flagged as installed.
    JobsMarked(Vec<SavedMark>),
}

impl MirrorEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            MirrorEvent::JobWritten(_) => "job_written",
            MirrorEvent::JobDeleted(_) => "job_deleted",
            MirrorEvent::EnvironmentWritten(_) => "environment_written",
            MirrorEvent::JobsMarked(_) => "jobs_marked",
        }
    }
}

/// Receives mutations after the primary write.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Apply one mutation to the mirror.
    async fn reflect(&self, event: &MirrorEvent) -> Result<(), StorageError>;
}

/// Mirrors mutations into a second [`Storage`] backend.
pub struct StorageMirror {
    target: Arc<dyn Storage>,
}

impl StorageMirror {
    /// Mirror into `target`.
    pub fn new(target: Arc<dyn Storage>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Mirror for StorageMirror {
    async fn reflect(&self, event: &MirrorEvent) -> Result<(), StorageError> {
        match event {
            MirrorEvent::JobWritten(job) => match self.target.replace_job(job.clone()).await {
                Err(StorageError::NotFound(_)) => self.target.insert_job(job.clone()).await,
                other => other,
            },
            MirrorEvent::JobDeleted(id) => match self.target.delete_job(id).await {
                Err(StorageError::NotFound(_)) => Ok(()),
                other => other,
            },
            MirrorEvent::EnvironmentWritten(text) => self.target.set_environment(text).await,
            MirrorEvent::JobsMarked(marks) => self.target.mark_saved(marks).await.map(|_| ()),
        }
    }
}

enum QueueMessage {
    Event(MirrorEvent),
    Flush(oneshot::Sender<()>),
}

/// Ordered, bounded hand-off from the write path to a [`Mirror`].
pub struct MirrorQueue {
    tx: mpsc::Sender<QueueMessage>,
}

impl MirrorQueue {
    /// Start the background task applying events to `mirror`, each bounded
    /// by `timeout`. Must be called from within a Tokio runtime.
    pub fn spawn(mirror: Arc<dyn Mirror>, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel(MIRROR_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    QueueMessage::Event(event) => {
                        match tokio::time::timeout(timeout, mirror.reflect(&event)).await {
                            Ok(Ok(())) => debug!(event = event.name(), "mirrored"),
                            Ok(Err(e)) => {
                                warn!(event = event.name(), error = %e, "mirror write failed")
                            }
                            Err(_) => {
                                warn!(event = event.name(), timeout = ?timeout, "mirror write timed out")
                            }
                        }
                    }
                    QueueMessage::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Queue an event without waiting.
    pub fn push(&self, event: MirrorEvent) {
        let name = event.name();
        match self.tx.try_send(QueueMessage::Event(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = name, "mirror queue full, dropping event")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(event = name, "mirror task stopped, dropping event")
            }
        }
    }

    /// Wait until every event queued so far has been applied or given up on.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(QueueMessage::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}
