use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clinic_vault_core::{
    AssetStore, AutoBackupInterval, BackupError, BackupHistoryItem, BackupSettings,
    ConsentPrompt, DestinationKind, FormatError, LedgerError, RelationalEngine, RestoreError,
    RetentionError,
};
use clinic_vault_store_sqlite::SqliteLedger;
use tracing::info;

use crate::assets::FsAssetStore;
use crate::bundle::{ArchivePreview, AssetBundler};
use crate::cleanup::{CleanupReport, RetentionRunner};
use crate::config::VaultConfig;
use crate::destination::{DirectoryDestination, DownloadDestination};
use crate::restore::{RestoreExecutor, RestoreMode, RestorePhase, RestoreReport};
use crate::schedule::{ScheduleGate, ScheduleHandle};
use crate::services::VaultServices;
use crate::writer::{BackupOutcome, BackupWriter};

/// Backup, retention, restore and scheduling over one set of services.
pub struct Vault {
    services: VaultServices,
    writer: Arc<BackupWriter>,
    retention: RetentionRunner,
    restore: RestoreExecutor,
    schedule: ScheduleGate,
    check_interval: Duration,
}

impl Vault {
    #[must_use]
    pub fn new(services: VaultServices, config: &VaultConfig, owner_id: Option<String>) -> Self {
        let writer = Arc::new(BackupWriter::new(
            services.clone(),
            config.writer_options(owner_id),
        ));
        let retention =
            RetentionRunner::new(services.clone(), config.retention_policy(), config.naming())
                .with_prompt_threshold(config.cleanup_prompt_threshold);
        let restore = RestoreExecutor::new(services.engine.clone(), services.assets.clone());
        let schedule = ScheduleGate::new(
            writer.clone(),
            services.settings.clone(),
            services.clock.clone(),
        );
        Self {
            services,
            writer,
            retention,
            restore,
            schedule,
            check_interval: config.check_interval(),
        }
    }

    /// Wire a vault for on-device use: the ledger database and asset directory under
    /// `config.data_dir`, the configured backup folder, and the downloads folder.
    ///
    /// # Errors
    /// Returns an error when the data directory or ledger database cannot be created.
    pub fn open_local(
        config: &VaultConfig,
        engine: Arc<dyn RelationalEngine>,
        prompt: Arc<dyn ConsentPrompt>,
        owner_id: Option<String>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;
        let ledger = Arc::new(SqliteLedger::open(&config.ledger_path())?);

        let assets: Arc<dyn AssetStore> = match &config.asset_namespace {
            Some(namespace) => Arc::new(
                FsAssetStore::namespaced(config.asset_root(), namespace)
                    .context("invalid asset namespace")?,
            ),
            None => Arc::new(FsAssetStore::new(config.asset_root())),
        };

        let download = Arc::new(DownloadDestination::new(config.resolved_download_dir()));
        let mut services = VaultServices::new(engine, ledger, download).with_assets(assets);
        if let Some(dir) = &config.backup_dir {
            services = services.with_directory(Arc::new(DirectoryDestination::new(dir, prompt)));
        }

        info!(
            data_dir = %config.data_dir.display(),
            directory = config.backup_dir.is_some(),
            "vault opened"
        );
        Ok(Self::new(services, config, owner_id))
    }

    /// # Errors
    /// See [`BackupWriter::run_manual`].
    pub fn backup_now(&self, target: DestinationKind) -> Result<BackupOutcome, BackupError> {
        self.writer.run_manual(target)
    }

    /// # Errors
    /// See [`RetentionRunner::cleanup_due`].
    pub fn cleanup_due(&self) -> Result<bool, LedgerError> {
        self.retention.cleanup_due()
    }

    /// # Errors
    /// See [`RetentionRunner::run`].
    pub fn cleanup(&self) -> Result<CleanupReport, RetentionError> {
        self.retention.run()
    }

    /// # Errors
    /// Returns the [`FormatError`] a restore of these bytes would be rejected with.
    pub fn preview_archive(&self, bytes: &[u8]) -> Result<ArchivePreview, FormatError> {
        AssetBundler::new().inspect(bytes)
    }

    /// # Errors
    /// See [`RestoreExecutor::restore`].
    pub fn restore(&self, mode: RestoreMode, bytes: &[u8]) -> Result<RestoreReport, RestoreError> {
        self.restore.restore(mode, bytes)
    }

    #[must_use]
    pub fn restore_phase(&self) -> RestorePhase {
        self.restore.phase()
    }

    /// # Errors
    /// Returns a [`LedgerError`] when settings cannot be read.
    pub fn settings(&self) -> Result<BackupSettings, LedgerError> {
        self.services.settings.load_settings()
    }

    /// Change the auto-backup cadence, keeping the recorded last backup and folder.
    ///
    /// # Errors
    /// Returns a [`LedgerError`] when settings cannot be read or written.
    pub fn set_auto_backup(
        &self,
        enabled: bool,
        interval: AutoBackupInterval,
    ) -> Result<BackupSettings, LedgerError> {
        let mut settings = self.services.settings.load_settings()?;
        settings.auto_backup_enabled = enabled;
        settings.auto_backup_interval = interval;
        self.services.settings.save_settings(&settings)?;
        Ok(settings)
    }

    /// # Errors
    /// Returns a [`LedgerError`] when history cannot be read.
    pub fn history(&self) -> Result<Vec<BackupHistoryItem>, LedgerError> {
        self.services.history.load_history()
    }

    #[must_use]
    pub fn schedule(&self) -> &ScheduleGate {
        &self.schedule
    }

    /// Start the scheduler at the configured check interval. Requires a tokio runtime.
    #[must_use]
    pub fn start_schedule(&self) -> ScheduleHandle {
        self.schedule.spawn(self.check_interval)
    }
}
