use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a Velero backup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupPhase {
    /// Velero leaves the phase empty until the controller picks the backup up.
    #[default]
    #[serde(alias = "")]
    New,
    InProgress,
    Completed,
    Deleting,
    PartiallyFailed,
    Failed,
}

impl BackupPhase {
    pub const ALL: [BackupPhase; 6] = [
        BackupPhase::New,
        BackupPhase::InProgress,
        BackupPhase::Completed,
        BackupPhase::Deleting,
        BackupPhase::PartiallyFailed,
        BackupPhase::Failed,
    ];
}

/// Kind of change reported by a resource watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Added, EventKind::Modified, EventKind::Deleted];
}

/// Severity of a classified backup event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Object metadata of a watched resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStatus {
    #[serde(default)]
    pub phase: BackupPhase,
}

/// Snapshot of a Velero `Backup` resource as delivered by a watch.
///
/// Only the fields the notification pipeline needs are decoded; everything
/// else in the object (spec, progress, timestamps) is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: BackupStatus,
}

impl Backup {
    pub fn new(name: impl Into<String>, phase: BackupPhase) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                ..ObjectMeta::default()
            },
            status: BackupStatus { phase },
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn phase(&self) -> BackupPhase {
        self.status.phase
    }
}

/// A raw watch event. The object stays undecoded until the engine checks
/// that it really is a backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub object: serde_json::Value,
}

/// A classified backup event ready for delivery.
///
/// Messages are never mutated after classification; the pipeline hands the
/// same `Arc<Message>` to every notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The backup finished, but some items could not be backed up.
    Warning(Backup),
    /// The backup failed as a whole.
    Error(Backup),
}

impl Message {
    pub fn new(severity: Severity, backup: Backup) -> Self {
        match severity {
            Severity::Warning => Message::Warning(backup),
            Severity::Error => Message::Error(backup),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Message::Warning(_) => Severity::Warning,
            Message::Error(_) => Severity::Error,
        }
    }

    pub fn backup(&self) -> &Backup {
        match self {
            Message::Warning(backup) | Message::Error(backup) => backup,
        }
    }

    /// One-line human readable description, e.g. `nightly is in state Failed`.
    pub fn summary(&self) -> String {
        let backup = self.backup();
        format!("{} is in state {}", backup.name(), backup.phase())
    }
}

impl std::fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupPhase::New => write!(f, "New"),
            BackupPhase::InProgress => write!(f, "InProgress"),
            BackupPhase::Completed => write!(f, "Completed"),
            BackupPhase::Deleting => write!(f, "Deleting"),
            BackupPhase::PartiallyFailed => write!(f, "PartiallyFailed"),
            BackupPhase::Failed => write!(f, "Failed"),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Added => write!(f, "ADDED"),
            EventKind::Modified => write!(f, "MODIFIED"),
            EventKind::Deleted => write!(f, "DELETED"),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}
