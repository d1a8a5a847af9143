//! Backup, retention, and restore for the clinic's local database.
//!
//! [`BackupWriter`] exports the live store, bundles it with assets into an archive when asked
//! to, and delivers it to a backup folder or the downloads folder. [`RetentionRunner`] thins
//! old backups to one per day. [`RestoreExecutor`] validates a supplied file before it touches
//! the live store. [`ScheduleGate`] triggers automatic backups on a daily or weekly cadence.
//! [`Vault`] wires all of them from a [`VaultConfig`].

pub mod assets;
pub mod bundle;
pub mod cleanup;
pub mod codec;
pub mod config;
pub mod destination;
pub mod ledger;
pub mod restore;
pub mod schedule;
pub mod services;
pub mod telemetry;
pub mod vault;
pub mod writer;

pub use assets::FsAssetStore;
pub use bundle::{
    snapshot_digest, ArchivePreview, AssetBundler, UnpackedArchive, ASSET_ENTRY_PREFIX,
    MANIFEST_ENTRY, SNAPSHOT_ENTRY,
};
pub use cleanup::{CleanupMode, CleanupReport, RemovalFailure, RetentionRunner};
pub use codec::SnapshotCodec;
pub use config::{ConfigError, VaultConfig};
pub use destination::{AlwaysGrant, DirectoryDestination, DownloadDestination};
pub use ledger::MemoryLedger;
pub use restore::{RestoreExecutor, RestoreMode, RestorePhase, RestoreReport};
pub use schedule::{ScheduleGate, ScheduleHandle, TickOutcome, DEFAULT_CHECK_INTERVAL};
pub use services::VaultServices;
pub use telemetry::init_tracing;
pub use vault::Vault;
pub use writer::{
    BackupOutcome, BackupReceipt, BackupWriter, WriterOptions, DEFAULT_HISTORY_LIMIT,
};
