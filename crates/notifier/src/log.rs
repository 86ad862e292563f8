use async_trait::async_trait;

use sentinel_common::types::Message;

use crate::Notifier;

/// Writes every message to the process log.
///
/// The pipeline always appends exactly one of these, so a failed backup is
/// visible even when no other channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&mut self, message: &Message) {
        let backup = message.backup();
        match message {
            Message::Warning(_) => tracing::warn!(
                backup = %backup.name(),
                phase = %backup.phase(),
                "Backup partially failed"
            ),
            Message::Error(_) => tracing::error!(
                backup = %backup.name(),
                phase = %backup.phase(),
                "Backup failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_common::types::{Backup, BackupPhase};

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_warning_is_logged() {
        let mut notifier = LogNotifier::new();
        notifier
            .notify(&Message::Warning(Backup::new(
                "testPartiallyFailed",
                BackupPhase::PartiallyFailed,
            )))
            .await;

        assert!(logs_contain("Backup partially failed"));
        assert!(logs_contain("testPartiallyFailed"));
        assert!(logs_contain("WARN"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_error_is_logged() {
        let mut notifier = LogNotifier::new();
        notifier
            .notify(&Message::Error(Backup::new("testFailed", BackupPhase::Failed)))
            .await;

        assert!(logs_contain("Backup failed"));
        assert!(logs_contain("phase=Failed"));
        assert!(logs_contain("ERROR"));
    }
}
