//! Capability traits for the collaborators this crate drives but does not implement.
//!
//! All capabilities are shared as `Arc<dyn Trait>` and take `&self`; implementations carry
//! their own interior mutability.

use time::OffsetDateTime;

use crate::error::{AssetError, DeliveryError, EngineError, LedgerError};
use crate::model::{BackupHistoryItem, BackupSettings, DestinationKind, StoredBackup};

/// Embedded relational store seen as an opaque byte image.
pub trait RelationalEngine: Send + Sync {
    /// Consistent point-in-time image of the full store.
    ///
    /// # Errors
    /// [`EngineError::StoreUninitialized`] when no store is open.
    fn export_image(&self) -> Result<Vec<u8>, EngineError>;

    /// Replace the full store with `image`.
    ///
    /// # Errors
    /// [`EngineError::LoadFailed`] when the engine cannot decode the image.
    fn load_image(&self, image: &[u8]) -> Result<(), EngineError>;
}

/// Keyed blob store for attachments such as images.
pub trait AssetStore: Send + Sync {
    /// # Errors
    /// Returns an [`AssetError`] when the store cannot be enumerated.
    fn list(&self) -> Result<Vec<String>, AssetError>;

    /// # Errors
    /// Returns an [`AssetError`] when the asset is missing or unreadable.
    fn read(&self, name: &str) -> Result<Vec<u8>, AssetError>;

    /// # Errors
    /// Returns an [`AssetError`] for invalid names or failed writes.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), AssetError>;
}

pub trait SettingsStore: Send + Sync {
    /// # Errors
    /// Returns a [`LedgerError`] when stored settings cannot be read.
    fn load_settings(&self) -> Result<BackupSettings, LedgerError>;

    /// # Errors
    /// Returns a [`LedgerError`] when settings cannot be persisted.
    fn save_settings(&self, settings: &BackupSettings) -> Result<(), LedgerError>;
}

/// Newest-first bounded log of successful backups.
pub trait HistoryLedger: Send + Sync {
    /// # Errors
    /// Returns a [`LedgerError`] when stored history cannot be read.
    fn load_history(&self) -> Result<Vec<BackupHistoryItem>, LedgerError>;

    /// Replace the whole history.
    ///
    /// # Errors
    /// Returns a [`LedgerError`] when history cannot be persisted.
    fn save_history(&self, history: &[BackupHistoryItem]) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Bytes are on durable media; `location` is a display path or folder name.
    Delivered { location: String },
    /// The user dismissed the platform prompt.
    Cancelled,
}

/// Target a backup is delivered to.
///
/// Only directory destinations can list and remove files. Download destinations hand the
/// file over once and return [`DeliveryError::Unsupported`] for everything else.
pub trait Destination: Send + Sync {
    fn kind(&self) -> DestinationKind;

    /// Display name of the chosen folder, if any.
    fn label(&self) -> Option<String>;

    /// # Errors
    /// Returns a [`DeliveryError`] when the platform refuses or the write fails.
    fn deliver(&self, file_name: &str, bytes: &[u8]) -> Result<Delivery, DeliveryError>;

    /// # Errors
    /// [`DeliveryError::Unsupported`] for download destinations.
    fn list_backups(&self) -> Result<Vec<StoredBackup>, DeliveryError>;

    /// # Errors
    /// [`DeliveryError::Unsupported`] for download destinations.
    fn remove_backup(&self, file_name: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Granted,
    Cancelled,
}

/// Platform prompt asking the user for read/write access to a folder.
pub trait ConsentPrompt: Send + Sync {
    fn request_access(&self, folder_name: &str) -> Consent;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Local wall clock, falling back to UTC when the local offset cannot be determined.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}
