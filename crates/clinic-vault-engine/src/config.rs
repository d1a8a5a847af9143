use std::path::{Path, PathBuf};
use std::time::Duration;

use clinic_vault_core::naming::{
    DEFAULT_ARCHIVE_EXTENSION, DEFAULT_FILE_PREFIX, DEFAULT_SNAPSHOT_EXTENSION,
};
use clinic_vault_core::{
    is_valid_asset_name, BackupNaming, RetentionPolicy, DEFAULT_CLEANUP_PROMPT_THRESHOLD,
    DEFAULT_RETENTION_DAYS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schedule::DEFAULT_CHECK_INTERVAL;
use crate::writer::{WriterOptions, DEFAULT_HISTORY_LIMIT};

const APP_DIR_NAME: &str = "clinic-vault";
const DATABASE_FILE: &str = "clinic.db";
const LEDGER_FILE: &str = "backup_ledger.db";
const ASSET_DIR: &str = "assets";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Vault configuration. Every field has a default, so an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Holds the clinic database, the backup ledger, and assets.
    pub data_dir: PathBuf,
    /// Backup folder the user granted access to. `None` on download-only platforms.
    pub backup_dir: Option<PathBuf>,
    /// Overrides the platform downloads folder.
    pub download_dir: Option<PathBuf>,
    /// Per-user asset directory under `<data_dir>/assets`.
    pub asset_namespace: Option<String>,
    pub include_assets: bool,
    pub file_prefix: String,
    pub snapshot_extension: String,
    pub archive_extension: String,
    pub retention_days: usize,
    pub cleanup_prompt_threshold: usize,
    pub history_limit: usize,
    pub check_interval_secs: u64,
    pub log_filter: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_dir: None,
            download_dir: None,
            asset_namespace: None,
            include_assets: true,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            snapshot_extension: DEFAULT_SNAPSHOT_EXTENSION.to_string(),
            archive_extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            cleanup_prompt_threshold: DEFAULT_CLEANUP_PROMPT_THRESHOLD,
            history_limit: DEFAULT_HISTORY_LIMIT,
            check_interval_secs: DEFAULT_CHECK_INTERVAL.as_secs(),
            log_filter: "info".to_string(),
        }
    }
}

impl VaultConfig {
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// # Errors
    /// Returns a [`ConfigError`] when the YAML cannot be parsed or validated.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_asset_name(&self.file_prefix) {
            return Err(ConfigError::Validation(format!(
                "file_prefix must be a plain file name prefix, got {:?}",
                self.file_prefix
            )));
        }
        for (field, extension) in [
            ("snapshot_extension", &self.snapshot_extension),
            ("archive_extension", &self.archive_extension),
        ] {
            if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Validation(format!(
                    "{field} must be non-empty and alphanumeric, got {extension:?}"
                )));
            }
        }
        if self.snapshot_extension == self.archive_extension {
            return Err(ConfigError::Validation(
                "snapshot_extension and archive_extension must differ".into(),
            ));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Validation("retention_days must be at least 1".into()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Validation("history_limit must be at least 1".into()));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "check_interval_secs must be at least 1".into(),
            ));
        }
        if let Some(namespace) = &self.asset_namespace {
            if !is_valid_asset_name(namespace) {
                return Err(ConfigError::Validation(format!(
                    "asset_namespace must be a single path component, got {namespace:?}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn naming(&self) -> BackupNaming {
        BackupNaming::new(
            self.file_prefix.clone(),
            self.snapshot_extension.clone(),
            self.archive_extension.clone(),
        )
    }

    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.retention_days)
    }

    #[must_use]
    pub fn writer_options(&self, owner_id: Option<String>) -> WriterOptions {
        WriterOptions {
            naming: self.naming(),
            include_assets: self.include_assets,
            history_limit: self.history_limit,
            cleanup_prompt_threshold: self.cleanup_prompt_threshold,
            owner_id,
        }
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    #[must_use]
    pub fn asset_root(&self) -> PathBuf {
        self.data_dir.join(ASSET_DIR)
    }

    /// Configured downloads folder, else the platform's, else `<data_dir>/downloads`.
    #[must_use]
    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| self.data_dir.join("downloads"))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
