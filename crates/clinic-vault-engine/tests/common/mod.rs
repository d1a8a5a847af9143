//! Shared fixtures for the vault integration tests: a seeded clinic database, a temp data
//! directory, a settable clock, and destinations that fail or block on demand.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use clinic_vault_core::{
    AssetStore, BackupHistoryItem, BackupSettings, Clock, Consent, ConsentPrompt, Delivery,
    DeliveryError, Destination, DestinationKind, HistoryLedger, LedgerError, SettingsStore,
    StoredBackup,
};
use clinic_vault_engine::{
    BackupWriter, DownloadDestination, FsAssetStore, MemoryLedger, VaultServices, WriterOptions,
};
use clinic_vault_store_sqlite::SqliteEngine;
use parking_lot::Mutex;
use tempfile::TempDir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub const CLINIC_SCHEMA_SQL: &str = r"
CREATE TABLE patients (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  photo_asset TEXT
);
CREATE TABLE prescriptions (
  id TEXT PRIMARY KEY,
  patient_id TEXT NOT NULL REFERENCES patients(id),
  prescription_name TEXT NOT NULL
);
";

pub const START: OffsetDateTime = datetime!(2024-03-01 09:30:00 +09:00);

pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn at(now: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

pub struct FixedConsent(pub Consent);

impl ConsentPrompt for FixedConsent {
    fn request_access(&self, _folder_name: &str) -> Consent {
        self.0
    }
}

/// Test context holding a seeded clinic database and temporary directories.
pub struct TestContext {
    pub temp_dir: TempDir,
    pub engine: Arc<SqliteEngine>,
    pub ledger: Arc<MemoryLedger>,
    pub assets: Arc<FsAssetStore>,
    pub clock: Arc<FixedClock>,
    pub downloads: PathBuf,
    pub backup_dir: PathBuf,
}

impl TestContext {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let engine = Arc::new(SqliteEngine::open(&temp_dir.path().join("clinic.db"))?);
        engine.with_connection(|conn| conn.execute_batch(CLINIC_SCHEMA_SQL))?;
        let assets = Arc::new(FsAssetStore::namespaced(
            temp_dir.path().join("assets"),
            "user-1",
        )?);
        let downloads = temp_dir.path().join("Downloads");
        let backup_dir = temp_dir.path().join("ClinicBackups");
        Ok(Self {
            temp_dir,
            engine,
            ledger: Arc::new(MemoryLedger::new()),
            assets,
            clock: FixedClock::at(START),
            downloads,
            backup_dir,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Download destination, asset store, and the fixed clock; no backup folder.
    pub fn services(&self) -> VaultServices {
        VaultServices::new(
            self.engine.clone(),
            self.ledger.clone(),
            Arc::new(DownloadDestination::new(&self.downloads)),
        )
        .with_assets(self.assets.clone())
        .with_clock(self.clock.clone())
    }

    pub fn services_with_folder(&self, consent: Consent) -> VaultServices {
        let folder = clinic_vault_engine::DirectoryDestination::new(
            &self.backup_dir,
            Arc::new(FixedConsent(consent)),
        );
        self.services().with_directory(Arc::new(folder))
    }

    pub fn writer(&self, services: VaultServices) -> BackupWriter {
        BackupWriter::new(services, WriterOptions::default())
    }

    pub fn add_patient(&self, id: &str, name: &str, photo: Option<&str>) -> anyhow::Result<()> {
        let photo = photo.map_or_else(|| "NULL".to_string(), |p| format!("'{p}'"));
        self.engine.with_connection(|conn| {
            conn.execute_batch(&format!(
                "INSERT INTO patients (id, name, photo_asset) VALUES ('{id}', '{name}', {photo});
                 INSERT INTO prescriptions (id, patient_id, prescription_name)
                   VALUES ('rx-{id}', '{id}', 'Ssanghwa-tang');"
            ))
        })
    }

    pub fn add_photo(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.assets.write(name, bytes)?;
        Ok(())
    }

    pub fn patient_count(&self) -> anyhow::Result<i64> {
        self.engine.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
        })
    }

    pub fn download_files(&self) -> anyhow::Result<Vec<String>> {
        list_files(&self.downloads)
    }

    pub fn folder_files(&self) -> anyhow::Result<Vec<String>> {
        list_files(&self.backup_dir)
    }
}

pub fn list_files(dir: &Path) -> anyhow::Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Directory destination wrapper whose removals fail for the listed names.
pub struct FlakyFolder {
    pub inner: Arc<dyn Destination>,
    pub fail_removal: BTreeSet<String>,
}

impl Destination for FlakyFolder {
    fn kind(&self) -> DestinationKind {
        self.inner.kind()
    }

    fn label(&self) -> Option<String> {
        self.inner.label()
    }

    fn deliver(&self, file_name: &str, bytes: &[u8]) -> Result<Delivery, DeliveryError> {
        self.inner.deliver(file_name, bytes)
    }

    fn list_backups(&self) -> Result<Vec<StoredBackup>, DeliveryError> {
        self.inner.list_backups()
    }

    fn remove_backup(&self, file_name: &str) -> Result<(), DeliveryError> {
        if self.fail_removal.contains(file_name) {
            return Err(DeliveryError::Io(format!("{file_name}: permission denied")));
        }
        self.inner.remove_backup(file_name)
    }
}

/// Download destination that signals when a delivery starts and waits for a release.
pub struct BlockingDownload {
    pub started: Mutex<Sender<()>>,
    pub release: Mutex<Receiver<()>>,
}

impl Destination for BlockingDownload {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Download
    }

    fn label(&self) -> Option<String> {
        None
    }

    fn deliver(&self, file_name: &str, _bytes: &[u8]) -> Result<Delivery, DeliveryError> {
        self.started
            .lock()
            .send(())
            .map_err(|err| DeliveryError::Io(err.to_string()))?;
        self.release
            .lock()
            .recv()
            .map_err(|err| DeliveryError::Io(err.to_string()))?;
        Ok(Delivery::Delivered {
            location: file_name.to_string(),
        })
    }

    fn list_backups(&self) -> Result<Vec<StoredBackup>, DeliveryError> {
        Err(DeliveryError::Unsupported("listing downloaded backups"))
    }

    fn remove_backup(&self, _file_name: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Unsupported("removing downloaded backups"))
    }
}

/// Ledger that reads through to a [`MemoryLedger`] but refuses the selected saves.
pub struct FailingLedger {
    pub inner: MemoryLedger,
    pub fail_settings: bool,
    pub fail_history: bool,
}

impl FailingLedger {
    pub fn settings_read_only(settings: &BackupSettings) -> anyhow::Result<Arc<Self>> {
        let inner = MemoryLedger::new();
        inner.save_settings(settings)?;
        Ok(Arc::new(Self {
            inner,
            fail_settings: true,
            fail_history: false,
        }))
    }

    fn disk_full() -> LedgerError {
        LedgerError::Storage("disk full".to_string())
    }
}

impl SettingsStore for FailingLedger {
    fn load_settings(&self) -> Result<BackupSettings, LedgerError> {
        self.inner.load_settings()
    }

    fn save_settings(&self, settings: &BackupSettings) -> Result<(), LedgerError> {
        if self.fail_settings {
            return Err(Self::disk_full());
        }
        self.inner.save_settings(settings)
    }
}

impl HistoryLedger for FailingLedger {
    fn load_history(&self) -> Result<Vec<BackupHistoryItem>, LedgerError> {
        self.inner.load_history()
    }

    fn save_history(&self, history: &[BackupHistoryItem]) -> Result<(), LedgerError> {
        if self.fail_history {
            return Err(Self::disk_full());
        }
        self.inner.save_history(history)
    }
}
