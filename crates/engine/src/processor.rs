//! Watch event processing.
//!
//! Receives raw watch events and:
//! 1. Checks the object kind and decodes it as a backup snapshot (anything
//!    else is rejected)
//! 2. Logs transitions that are only of interest to operators
//! 3. Classifies the event (via `classify_backup`)
//! 4. Enqueues the resulting message on the notification pipeline intake

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use sentinel_common::error::AppError;
use sentinel_common::types::{Backup, BackupPhase, EventKind, Message, Severity, WatchEvent};

use crate::classifier::classify_backup;

const BACKUP_KIND: &str = "Backup";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("event object is not a backup: {0}")]
    NotABackup(#[source] serde_json::Error),

    #[error("event object is not a backup: kind is {0}")]
    WrongKind(String),

    #[error("notification pipeline is closed")]
    IntakeClosed,
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotABackup(_) | ProcessError::WrongKind(_) => {
                AppError::Decode(err.to_string())
            }
            ProcessError::IntakeClosed => AppError::Unavailable(err.to_string()),
        }
    }
}

/// Feeds classified backup events into the notification pipeline.
///
/// Cheap to clone; the pipeline shuts down once every clone is dropped.
#[derive(Debug, Clone)]
pub struct EventProcessor {
    intake: mpsc::Sender<Arc<Message>>,
}

impl EventProcessor {
    pub fn new(intake: mpsc::Sender<Arc<Message>>) -> Self {
        Self { intake }
    }

    /// Process one watch event.
    ///
    /// Returns the severity of the enqueued message, or `None` when the event
    /// does not warrant a notification. Waits while the pipeline is busy.
    pub async fn process(&self, event: WatchEvent) -> Result<Option<Severity>, ProcessError> {
        // Objects without a kind are taken as backups.
        if let Some(kind) = event.object.get("kind") {
            if kind.as_str() != Some(BACKUP_KIND) {
                let kind = kind.as_str().map_or_else(|| kind.to_string(), str::to_string);
                tracing::error!(event_type = %event.kind, kind = %kind, "Non-backup event registered");
                return Err(ProcessError::WrongKind(kind));
            }
        }

        let backup: Backup = serde_json::from_value(event.object).map_err(|e| {
            tracing::error!(event_type = %event.kind, error = %e, "Non-backup event registered");
            ProcessError::NotABackup(e)
        })?;

        let name = backup.name().to_string();
        match event.kind {
            EventKind::Added => tracing::info!(name = %name, "Backup added"),
            EventKind::Deleted => tracing::info!(name = %name, "Backup deleted"),
            EventKind::Modified => match backup.phase() {
                BackupPhase::New => {
                    tracing::info!(name = %name, state = %event.kind, "New backup detected")
                }
                BackupPhase::InProgress => {
                    tracing::info!(name = %name, state = %event.kind, "Backup in progress")
                }
                BackupPhase::Completed => {
                    tracing::info!(name = %name, state = %event.kind, "Backup completed")
                }
                BackupPhase::Deleting => {
                    tracing::info!(name = %name, state = %event.kind, "Backup deletion")
                }
                BackupPhase::PartiallyFailed | BackupPhase::Failed => {}
            },
        }

        let Some(message) = classify_backup(event.kind, backup) else {
            return Ok(None);
        };
        let severity = message.severity();

        self.intake
            .send(Arc::new(message))
            .await
            .map_err(|_| ProcessError::IntakeClosed)?;

        tracing::debug!(name = %name, severity = %severity, "Message enqueued");
        Ok(Some(severity))
    }

    /// Process events until `events` is closed or the pipeline goes away.
    ///
    /// Malformed events are logged and skipped.
    pub async fn run(&self, mut events: mpsc::Receiver<WatchEvent>) {
        tracing::info!("Event processor started");
        while let Some(event) = events.recv().await {
            match self.process(event).await {
                Ok(_) | Err(ProcessError::NotABackup(_) | ProcessError::WrongKind(_)) => {}
                Err(ProcessError::IntakeClosed) => {
                    tracing::warn!("Notification pipeline closed, stopping event processor");
                    break;
                }
            }
        }
        tracing::info!("Event processor stopped");
    }
}
