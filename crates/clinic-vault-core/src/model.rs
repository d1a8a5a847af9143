use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use ulid::Ulid;

/// Archive manifest version written by this crate; newer versions are rejected on restore.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoBackupInterval {
    #[default]
    Daily,
    Weekly,
    Manual,
}

impl AutoBackupInterval {
    /// Minimum elapsed time between automatic backups; `None` means never automatic.
    #[must_use]
    pub fn threshold(self) -> Option<Duration> {
        match self {
            Self::Daily => Some(Duration::hours(24)),
            Self::Weekly => Some(Duration::hours(168)),
            Self::Manual => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Manual => "manual",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    pub auto_backup_enabled: bool,
    pub auto_backup_interval: AutoBackupInterval,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_backup_at: Option<OffsetDateTime>,
    pub backup_folder_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Manual,
    Auto,
}

impl BackupKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl Display for BackupKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One successful backup, as recorded in the history ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupHistoryItem {
    pub id: String,
    pub filename: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: BackupKind,
}

impl BackupHistoryItem {
    #[must_use]
    pub fn new(filename: String, created_at: OffsetDateTime, size: u64, kind: BackupKind) -> Self {
        Self {
            id: Ulid::new().to_string(),
            filename,
            created_at,
            size,
            kind,
        }
    }
}

/// Prepend `item` to a newest-first history and evict the oldest entries beyond `limit`.
pub fn append_history(history: &mut Vec<BackupHistoryItem>, item: BackupHistoryItem, limit: usize) {
    history.insert(0, item);
    history.truncate(limit);
}

/// A named binary attachment stored outside the relational engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Asset {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Asset names are a single, non-empty path component.
#[must_use]
pub fn is_valid_asset_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// An asset that was skipped while unpacking or restoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetWarning {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub format_version: u32,
    pub asset_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Directory,
    Download,
}

impl Display for DestinationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// A file found in a backup directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBackup {
    pub name: String,
    pub size: u64,
}
