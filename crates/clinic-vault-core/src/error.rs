//! Error taxonomy for backup, retention, and restore.
//!
//! Every public operation returns one of these as a value. `UserFacingError` is the
//! serializable shape handed to the UI layer: a stable code, a category, and a short message,
//! with internal detail kept separate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supplied bytes failed a signature or structural check.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FormatError {
    #[error("file is empty")]
    Empty,
    #[error("file is too short to be a database snapshot ({len} bytes)")]
    TooShort { len: usize },
    #[error("file does not start with the database signature")]
    SignatureMismatch,
    #[error("file is not a readable backup archive: {0}")]
    NotAnArchive(String),
    #[error("archive does not contain a database snapshot")]
    MissingSnapshotEntry,
    #[error("archive manifest is invalid: {0}")]
    InvalidMetadata(String),
    #[error("archive format version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("archive snapshot digest does not match its manifest")]
    ChecksumMismatch,
}

/// The relational engine refused an export or a load.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("relational store is not initialized")]
    StoreUninitialized,
    #[error("failed to export relational store: {0}")]
    ExportFailed(String),
    #[error("relational store rejected snapshot: {0}")]
    LoadFailed(String),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AssetError {
    #[error("invalid asset name: {0:?}")]
    InvalidName(String),
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("asset store I/O failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("backup settings storage failed: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DeliveryError {
    #[error("destination is not available on this platform")]
    Unavailable,
    #[error("access to the backup folder was not granted")]
    AccessDenied,
    #[error("destination does not support {0}")]
    Unsupported(&'static str),
    #[error("destination I/O failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BundleError {
    #[error("failed to build backup archive: {0}")]
    Archive(String),
}

/// Failure of one backup run. Persisted settings and history are untouched when any of these
/// is returned before delivery completed.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BackupError {
    #[error("backup folder access is not supported on this platform")]
    DestinationUnavailable,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Delivery(DeliveryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<DeliveryError> for BackupError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Unavailable => Self::DestinationUnavailable,
            other => Self::Delivery(other),
        }
    }
}

impl BackupError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DestinationUnavailable => ErrorCategory::UnsupportedPlatform,
            _ => ErrorCategory::Internal,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DestinationUnavailable => "BACKUP_DESTINATION_UNAVAILABLE",
            Self::Engine(_) => "BACKUP_ENGINE_FAILED",
            Self::Asset(_) => "BACKUP_ASSET_READ_FAILED",
            Self::Bundle(_) => "BACKUP_ARCHIVE_FAILED",
            Self::Delivery(_) => "BACKUP_DELIVERY_FAILED",
            Self::Ledger(_) => "BACKUP_LEDGER_FAILED",
        }
    }
}

/// Failure of one restore attempt.
///
/// `Rejected` is raised during validation and guarantees the live store was not touched.
/// `Engine` is raised by the engine itself and is never retried.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RestoreError {
    #[error("restore rejected: {0}")]
    Rejected(#[from] FormatError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RestoreError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected(_) => ErrorCategory::InvalidFile,
            Self::Engine(_) => ErrorCategory::Internal,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "RESTORE_INVALID_FILE",
            Self::Engine(_) => "RESTORE_ENGINE_FAILED",
        }
    }
}

/// Failure of a retention cleanup run as a whole. Individual failed removals are reported,
/// not raised.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RetentionError {
    #[error(transparent)]
    Destination(#[from] DeliveryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl RetentionError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Destination(DeliveryError::Unavailable | DeliveryError::Unsupported(_)) => {
                ErrorCategory::UnsupportedPlatform
            }
            _ => ErrorCategory::Internal,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Destination(DeliveryError::AccessDenied) => "CLEANUP_ACCESS_DENIED",
            Self::Destination(_) => "CLEANUP_DESTINATION_FAILED",
            Self::Ledger(_) => "CLEANUP_LEDGER_FAILED",
        }
    }
}

/// Non-fatal restore outcome: some bundled assets could not be extracted or written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartialAssetLoss {
    pub lost: usize,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UnsupportedPlatform,
    InvalidFile,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::UnsupportedPlatform => {
                "Saving to a backup folder is not supported on this device. Download the backup instead."
            }
            Self::InvalidFile => "The selected file is not a valid backup.",
            Self::Internal => "The operation could not be completed. Please try again.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPlatform => write!(f, "unsupported_platform"),
            Self::InvalidFile => write!(f, "invalid_file"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Serializable error shape for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserFacingError {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    /// Internal detail for logs; never shown as the primary message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&BackupError> for UserFacingError {
    fn from(err: &BackupError) -> Self {
        let category = err.category();
        Self {
            code: err.code().to_string(),
            category,
            message: category.user_message().to_string(),
            detail: Some(err.to_string()),
        }
    }
}

impl From<&RetentionError> for UserFacingError {
    fn from(err: &RetentionError) -> Self {
        let category = err.category();
        Self {
            code: err.code().to_string(),
            category,
            message: category.user_message().to_string(),
            detail: Some(err.to_string()),
        }
    }
}

impl From<&RestoreError> for UserFacingError {
    fn from(err: &RestoreError) -> Self {
        let category = err.category();
        Self {
            code: err.code().to_string(),
            category,
            message: category.user_message().to_string(),
            detail: Some(err.to_string()),
        }
    }
}
