use sentinel_common::types::{Backup, BackupPhase, EventKind, Message, Severity};

/// Decide whether a backup event is worth a notification.
///
/// Creation and deletion never notify; for modifications only the two
/// failure phases do.
pub fn classify(phase: BackupPhase, kind: EventKind) -> Option<Severity> {
    match kind {
        EventKind::Added | EventKind::Deleted => None,
        EventKind::Modified => match phase {
            BackupPhase::PartiallyFailed => Some(Severity::Warning),
            BackupPhase::Failed => Some(Severity::Error),
            BackupPhase::New
            | BackupPhase::InProgress
            | BackupPhase::Completed
            | BackupPhase::Deleting => None,
        },
    }
}

/// Build the message for `backup`, if its event classifies as one.
pub fn classify_backup(kind: EventKind, backup: Backup) -> Option<Message> {
    classify(backup.phase(), kind).map(|severity| Message::new(severity, backup))
}
