//! Filesystem-backed destinations.
//!
//! [`DirectoryDestination`] models a user-chosen folder the app may read, write, enumerate and
//! delete in after a one-time consent prompt. [`DownloadDestination`] models a one-shot
//! hand-over into the platform downloads folder; the app cannot see the file afterwards.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clinic_vault_core::{
    is_valid_asset_name, Consent, ConsentPrompt, Delivery, DeliveryError, Destination,
    DestinationKind, StoredBackup,
};
use tracing::{debug, info};

/// Consent prompt for setups where the folder was chosen ahead of time.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGrant;

impl ConsentPrompt for AlwaysGrant {
    fn request_access(&self, _folder_name: &str) -> Consent {
        Consent::Granted
    }
}

pub struct DirectoryDestination {
    root: PathBuf,
    folder_name: String,
    prompt: Arc<dyn ConsentPrompt>,
    granted: AtomicBool,
}

impl DirectoryDestination {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, prompt: Arc<dyn ConsentPrompt>) -> Self {
        let root = root.into();
        let folder_name = root
            .file_name()
            .map_or_else(|| root.display().to_string(), |name| name.to_string_lossy().into_owned());
        Self {
            root,
            folder_name,
            prompt,
            granted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ask for access once; a cancelled prompt is asked again next time.
    fn ensure_access(&self) -> Consent {
        if self.granted.load(Ordering::Acquire) {
            return Consent::Granted;
        }
        let consent = self.prompt.request_access(&self.folder_name);
        if consent == Consent::Granted {
            self.granted.store(true, Ordering::Release);
        }
        consent
    }

    fn file_path(&self, file_name: &str) -> Result<PathBuf, DeliveryError> {
        check_file_name(file_name)?;
        Ok(self.root.join(file_name))
    }
}

impl Destination for DirectoryDestination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Directory
    }

    fn label(&self) -> Option<String> {
        Some(self.folder_name.clone())
    }

    fn deliver(&self, file_name: &str, bytes: &[u8]) -> Result<Delivery, DeliveryError> {
        if self.ensure_access() == Consent::Cancelled {
            info!(folder = %self.folder_name, "backup folder access cancelled");
            return Ok(Delivery::Cancelled);
        }
        write_durably(&self.root, file_name, bytes)?;
        info!(file = %file_name, folder = %self.folder_name, size = bytes.len(), "backup written");
        Ok(Delivery::Delivered {
            location: self.folder_name.clone(),
        })
    }

    fn list_backups(&self) -> Result<Vec<StoredBackup>, DeliveryError> {
        if self.ensure_access() == Consent::Cancelled {
            return Err(DeliveryError::AccessDenied);
        }
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.root, &err)),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(&self.root, &err))?;
            let metadata = entry.metadata().map_err(|err| io_error(&entry.path(), &err))?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                backups.push(StoredBackup {
                    name: name.to_string(),
                    size: metadata.len(),
                });
            }
        }
        backups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(backups)
    }

    fn remove_backup(&self, file_name: &str) -> Result<(), DeliveryError> {
        if self.ensure_access() == Consent::Cancelled {
            return Err(DeliveryError::AccessDenied);
        }
        let path = self.file_path(file_name)?;
        fs::remove_file(&path).map_err(|err| io_error(&path, &err))?;
        debug!(file = %file_name, "removed backup file");
        Ok(())
    }
}

/// One-shot delivery into a downloads folder.
#[derive(Debug, Clone)]
pub struct DownloadDestination {
    dir: PathBuf,
}

impl DownloadDestination {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The platform downloads folder, when the platform has one.
    #[must_use]
    pub fn platform_default() -> Option<Self> {
        dirs::download_dir().map(Self::new)
    }
}

impl Destination for DownloadDestination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Download
    }

    fn label(&self) -> Option<String> {
        None
    }

    fn deliver(&self, file_name: &str, bytes: &[u8]) -> Result<Delivery, DeliveryError> {
        let path = write_durably(&self.dir, file_name, bytes)?;
        info!(path = %path.display(), size = bytes.len(), "backup downloaded");
        Ok(Delivery::Delivered {
            location: path.display().to_string(),
        })
    }

    fn list_backups(&self) -> Result<Vec<StoredBackup>, DeliveryError> {
        Err(DeliveryError::Unsupported("listing downloaded backups"))
    }

    fn remove_backup(&self, _file_name: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Unsupported("removing downloaded backups"))
    }
}

/// Write `<file_name>.partial`, sync it, then rename it into place, so a failed write never
/// leaves a truncated backup under the final name.
fn write_durably(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, DeliveryError> {
    check_file_name(file_name)?;
    fs::create_dir_all(dir).map_err(|err| io_error(dir, &err))?;
    let path = dir.join(file_name);
    let staged = dir.join(format!("{file_name}.partial"));

    let written = File::create(&staged)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staged, &path));
    if let Err(err) = written {
        let _ = fs::remove_file(&staged);
        return Err(io_error(&path, &err));
    }
    Ok(path)
}

fn check_file_name(file_name: &str) -> Result<(), DeliveryError> {
    if is_valid_asset_name(file_name) {
        Ok(())
    } else {
        Err(DeliveryError::Io(format!("invalid backup file name {file_name:?}")))
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> DeliveryError {
    DeliveryError::Io(format!("{}: {err}", path.display()))
}
