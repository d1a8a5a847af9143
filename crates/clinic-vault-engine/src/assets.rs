use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clinic_vault_core::{is_valid_asset_name, AssetError, AssetStore};

/// Assets kept as plain files under `root`, optionally inside a per-user namespace directory.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    dir: PathBuf,
}

impl FsAssetStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { dir: root.into() }
    }

    /// # Errors
    /// Returns [`AssetError::InvalidName`] when `namespace` is not a single path component.
    pub fn namespaced(root: impl Into<PathBuf>, namespace: &str) -> Result<Self, AssetError> {
        if !is_valid_asset_name(namespace) {
            return Err(AssetError::InvalidName(namespace.to_string()));
        }
        Ok(Self {
            dir: root.into().join(namespace),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, AssetError> {
        if !is_valid_asset_name(name) {
            return Err(AssetError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

impl AssetStore for FsAssetStore {
    fn list(&self) -> Result<Vec<String>, AssetError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.dir, &err)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(&self.dir, &err))?;
            let file_type = entry.file_type().map_err(|err| io_error(&entry.path(), &err))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_asset_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        let path = self.path_for(name)?;
        fs::read(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => AssetError::NotFound(name.to_string()),
            _ => io_error(&path, &err),
        })
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), AssetError> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir).map_err(|err| io_error(&self.dir, &err))?;
        fs::write(&path, bytes).map_err(|err| io_error(&path, &err))
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> AssetError {
    AssetError::Io(format!("{}: {err}", path.display()))
}
