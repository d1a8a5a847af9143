use std::sync::Arc;

use clinic_vault_core::{
    append_history, cleanup_prompt_due, wall_clock, Asset, AssetStore, BackupError, BackupFormat,
    BackupHistoryItem, BackupKind, BackupNaming, Delivery, Destination, DestinationKind,
    LedgerError, DEFAULT_CLEANUP_PROMPT_THRESHOLD,
};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::bundle::AssetBundler;
use crate::codec::SnapshotCodec;
use crate::services::VaultServices;

pub const DEFAULT_HISTORY_LIMIT: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub naming: BackupNaming,
    /// Bundle assets into an archive when an asset store is available.
    pub include_assets: bool,
    pub history_limit: usize,
    pub cleanup_prompt_threshold: usize,
    pub owner_id: Option<String>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            naming: BackupNaming::default(),
            include_assets: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
            cleanup_prompt_threshold: DEFAULT_CLEANUP_PROMPT_THRESHOLD,
            owner_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReceipt {
    pub item: BackupHistoryItem,
    pub destination: DestinationKind,
    pub location: String,
    pub format: BackupFormat,
    pub asset_count: usize,
    /// The retained history reached the cleanup prompt threshold.
    pub cleanup_due: bool,
    /// The file was delivered but settings or history could not be updated.
    pub ledger_warning: Option<LedgerError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Completed(BackupReceipt),
    /// The user dismissed the folder prompt. Nothing was written or recorded.
    Cancelled,
}

/// Drives one backup from snapshot export to delivery and records it.
pub struct BackupWriter {
    services: VaultServices,
    codec: SnapshotCodec,
    bundler: AssetBundler,
    options: WriterOptions,
}

impl BackupWriter {
    #[must_use]
    pub fn new(services: VaultServices, options: WriterOptions) -> Self {
        Self {
            codec: SnapshotCodec::new(services.engine.clone()),
            services,
            bundler: AssetBundler::new(),
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// User-initiated backup to `target`.
    ///
    /// # Errors
    /// [`BackupError::DestinationUnavailable`] when `target` is a directory and the platform
    /// has none; otherwise the first failing step before delivery. Settings and history are
    /// only written after the destination reports success, and a failure to write them is
    /// reported in [`BackupReceipt::ledger_warning`] instead.
    pub fn run_manual(&self, target: DestinationKind) -> Result<BackupOutcome, BackupError> {
        self.run(BackupKind::Manual, target)
    }

    /// Scheduled backup, always handed over through the download destination.
    ///
    /// # Errors
    /// Same as [`BackupWriter::run_manual`].
    pub fn run_auto(&self) -> Result<BackupOutcome, BackupError> {
        self.run(BackupKind::Auto, DestinationKind::Download)
    }

    fn run(&self, kind: BackupKind, target: DestinationKind) -> Result<BackupOutcome, BackupError> {
        let destination = self.destination(target)?;
        let now = self.services.clock.now();

        let snapshot = self.codec.export()?;
        let (format, bytes, asset_count) = match self.bundled_assets()? {
            Some(assets) => {
                let metadata = self.bundler.manifest_for(
                    &snapshot,
                    assets.len(),
                    now,
                    self.options.owner_id.clone(),
                )?;
                let archive = self.bundler.pack(&snapshot, &assets, &metadata)?;
                (BackupFormat::Archive, archive, assets.len())
            }
            None => (BackupFormat::Snapshot, snapshot.into_bytes(), 0),
        };

        let file_name = self.options.naming.file_name(wall_clock(now), format);
        let location = match destination.deliver(&file_name, &bytes)? {
            Delivery::Delivered { location } => location,
            Delivery::Cancelled => {
                info!(%kind, %target, "backup cancelled at destination prompt");
                return Ok(BackupOutcome::Cancelled);
            }
        };

        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let item = BackupHistoryItem::new(file_name, now, size, kind);

        let settings_saved = self.record_settings(now, target, destination.as_ref());
        let retained = self.record_history(item.clone());
        if let Err(err) = &settings_saved {
            warn!(
                file = %item.filename,
                error = %err,
                "backup delivered but settings not updated"
            );
        }
        if let Err(err) = &retained {
            warn!(
                file = %item.filename,
                error = %err,
                "backup delivered but history not updated"
            );
        }
        let ledger_warning = settings_saved.err().or_else(|| retained.as_ref().err().cloned());
        let cleanup_due = retained
            .is_ok_and(|len| cleanup_prompt_due(len, self.options.cleanup_prompt_threshold));

        info!(
            file = %item.filename,
            %kind,
            %target,
            size,
            assets = asset_count,
            cleanup_due,
            "backup completed"
        );
        Ok(BackupOutcome::Completed(BackupReceipt {
            item,
            destination: target,
            location,
            format,
            asset_count,
            cleanup_due,
            ledger_warning,
        }))
    }

    fn record_settings(
        &self,
        now: OffsetDateTime,
        target: DestinationKind,
        destination: &dyn Destination,
    ) -> Result<(), LedgerError> {
        let mut settings = self.services.settings.load_settings()?;
        settings.last_backup_at = Some(now);
        if target == DestinationKind::Directory {
            settings.backup_folder_name = destination.label();
        }
        self.services.settings.save_settings(&settings)
    }

    /// Prepend `item` and return the retained history length.
    fn record_history(&self, item: BackupHistoryItem) -> Result<usize, LedgerError> {
        let mut history = self.services.history.load_history()?;
        append_history(&mut history, item, self.options.history_limit);
        self.services.history.save_history(&history)?;
        Ok(history.len())
    }

    fn destination(&self, target: DestinationKind) -> Result<Arc<dyn Destination>, BackupError> {
        match target {
            DestinationKind::Directory => self.services.directory.clone().ok_or_else(|| {
                warn!("directory backup requested but no backup folder is available");
                BackupError::DestinationUnavailable
            }),
            DestinationKind::Download => Ok(self.services.download.clone()),
        }
    }

    /// Every listed asset, or `None` when backups carry the snapshot alone. An unreadable
    /// asset fails the backup.
    fn bundled_assets(&self) -> Result<Option<Vec<Asset>>, BackupError> {
        let Some(store) = self.services.assets.as_ref().filter(|_| self.options.include_assets)
        else {
            return Ok(None);
        };
        Ok(Some(read_all(store.as_ref())?))
    }
}

fn read_all(store: &dyn AssetStore) -> Result<Vec<Asset>, BackupError> {
    let mut assets = Vec::new();
    for name in store.list()? {
        let bytes = store.read(&name)?;
        assets.push(Asset::new(name, bytes));
    }
    Ok(assets)
}
