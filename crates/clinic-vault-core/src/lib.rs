//! Domain model for local snapshot backup, retention, and restore.
//!
//! Pure types and decisions only: no I/O happens in this crate. Collaborators (the relational
//! engine, asset store, destinations, settings and history storage) are reached through the
//! traits in [`ports`].

pub mod error;
pub mod model;
pub mod naming;
pub mod ports;
pub mod retention;
pub mod schedule;
pub mod snapshot;

pub use error::{
    AssetError, BackupError, BundleError, DeliveryError, EngineError, ErrorCategory, FormatError,
    LedgerError, PartialAssetLoss, RestoreError, RetentionError, UserFacingError,
};
pub use model::{
    append_history, is_valid_asset_name, ArchiveMetadata, Asset, AssetWarning, AutoBackupInterval,
    BackupHistoryItem, BackupKind, BackupSettings, DestinationKind, StoredBackup,
    ARCHIVE_FORMAT_VERSION,
};
pub use naming::{wall_clock, BackupFormat, BackupNaming, ParsedBackupName};
pub use ports::{
    AssetStore, Clock, Consent, ConsentPrompt, Delivery, Destination, HistoryLedger,
    RelationalEngine, SettingsStore, SystemClock,
};
pub use retention::{
    cleanup_prompt_due, Dated, RetentionDecision, RetentionPolicy,
    DEFAULT_CLEANUP_PROMPT_THRESHOLD, DEFAULT_RETENTION_DAYS,
};
pub use schedule::needs_auto_backup;
pub use snapshot::{check_signature, Snapshot, SNAPSHOT_SIGNATURE};
