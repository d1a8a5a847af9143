//! ZIP archives carrying a snapshot, its assets, and a manifest.
//!
//! Layout: `manifest.json`, `snapshot.db`, then one `assets/<name>` entry per asset. Packing is
//! deterministic for identical inputs: entry order follows the input, every entry carries the
//! same fixed timestamp, and compression is Deflate at a fixed level.

use std::io::{Cursor, Read, Write};

use clinic_vault_core::{
    is_valid_asset_name, ArchiveMetadata, Asset, AssetWarning, BundleError, FormatError,
    Snapshot, ARCHIVE_FORMAT_VERSION,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const SNAPSHOT_ENTRY: &str = "snapshot.db";
pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const ASSET_ENTRY_PREFIX: &str = "assets/";

const ARCHIVE_COMPRESSION_LEVEL: i32 = 6;

/// Contents of an archive that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedArchive {
    pub snapshot: Snapshot,
    pub assets: Vec<Asset>,
    /// `None` for archives written without a manifest.
    pub metadata: Option<ArchiveMetadata>,
    /// Asset entries that were skipped, plus a `manifest.json` entry when the manifest's asset
    /// count disagrees with the archive.
    pub warnings: Vec<AssetWarning>,
}

/// What an archive holds, read without extracting any asset.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivePreview {
    pub metadata: Option<ArchiveMetadata>,
    pub asset_entries: usize,
    pub snapshot_size: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssetBundler;

impl AssetBundler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Manifest for a snapshot about to be packed with `asset_count` assets.
    ///
    /// # Errors
    /// Returns [`BundleError::Archive`] when the asset count does not fit the manifest field.
    pub fn manifest_for(
        &self,
        snapshot: &Snapshot,
        asset_count: usize,
        created_at: OffsetDateTime,
        owner_id: Option<String>,
    ) -> Result<ArchiveMetadata, BundleError> {
        let asset_count = u32::try_from(asset_count)
            .map_err(|_| BundleError::Archive(format!("too many assets: {asset_count}")))?;
        Ok(ArchiveMetadata {
            format_version: ARCHIVE_FORMAT_VERSION,
            asset_count,
            created_at,
            owner_id,
            snapshot_sha256: Some(snapshot_digest(snapshot)),
        })
    }

    /// # Errors
    /// Returns [`BundleError::Archive`] for invalid asset names or when the ZIP cannot be
    /// written.
    pub fn pack(
        &self,
        snapshot: &Snapshot,
        assets: &[Asset],
        metadata: &ArchiveMetadata,
    ) -> Result<Vec<u8>, BundleError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = entry_options();

        let manifest = serde_json::to_vec_pretty(metadata).map_err(archive_error)?;
        zip.start_file(MANIFEST_ENTRY, options).map_err(archive_error)?;
        zip.write_all(&manifest).map_err(archive_error)?;

        zip.start_file(SNAPSHOT_ENTRY, options).map_err(archive_error)?;
        zip.write_all(snapshot.as_bytes()).map_err(archive_error)?;

        for asset in assets {
            if !is_valid_asset_name(&asset.name) {
                return Err(BundleError::Archive(format!(
                    "invalid asset name {:?}",
                    asset.name
                )));
            }
            zip.start_file(format!("{ASSET_ENTRY_PREFIX}{}", asset.name), options)
                .map_err(archive_error)?;
            zip.write_all(&asset.bytes).map_err(archive_error)?;
        }

        let bytes = zip.finish().map_err(archive_error)?.into_inner();
        debug!(assets = assets.len(), size = bytes.len(), "packed backup archive");
        Ok(bytes)
    }

    /// Validate and extract an archive.
    ///
    /// The snapshot entry, its signature, and the manifest are all checked before any asset
    /// entry is read. Asset extraction is best-effort per entry.
    ///
    /// # Errors
    /// Returns a [`FormatError`] when the archive as a whole is unusable.
    pub fn unpack(&self, bytes: &[u8]) -> Result<UnpackedArchive, FormatError> {
        let mut archive = open_archive(bytes)?;
        let snapshot = read_snapshot(&mut archive)?;
        let metadata = read_manifest(&mut archive)?;
        if let Some(metadata) = &metadata {
            check_manifest(metadata, &snapshot)?;
        }

        let mut assets = Vec::new();
        let mut warnings = Vec::new();
        let mut asset_entries = 0_usize;
        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(index, error = %err, "skipping unreadable archive entry");
                    warnings.push(AssetWarning {
                        name: format!("#{index}"),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let Some(name) = entry.name().strip_prefix(ASSET_ENTRY_PREFIX) else {
                continue;
            };
            if entry.is_dir() || name.is_empty() {
                continue;
            }
            asset_entries += 1;
            let name = name.to_string();
            if !is_valid_asset_name(&name) {
                warn!(asset = %name, "skipping asset entry with unsafe name");
                warnings.push(AssetWarning {
                    name,
                    reason: "unsafe asset name".to_string(),
                });
                continue;
            }

            let mut contents = Vec::new();
            match entry.read_to_end(&mut contents) {
                Ok(_) => assets.push(Asset::new(name, contents)),
                Err(err) => {
                    warn!(asset = %name, error = %err, "skipping corrupt asset entry");
                    warnings.push(AssetWarning {
                        name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if let Some(expected) = metadata.as_ref().map(|m| m.asset_count as usize) {
            if expected != asset_entries {
                warn!(expected, found = asset_entries, "asset count disagrees with manifest");
                warnings.push(AssetWarning {
                    name: MANIFEST_ENTRY.to_string(),
                    reason: format!(
                        "manifest lists {expected} assets, archive holds {asset_entries}"
                    ),
                });
            }
        }

        debug!(
            assets = assets.len(),
            skipped = warnings.len(),
            "unpacked backup archive"
        );
        Ok(UnpackedArchive {
            snapshot,
            assets,
            metadata,
            warnings,
        })
    }

    /// Run the same checks as [`AssetBundler::unpack`] but only count asset entries.
    ///
    /// # Errors
    /// Returns a [`FormatError`] when the archive would be rejected by a restore.
    pub fn inspect(&self, bytes: &[u8]) -> Result<ArchivePreview, FormatError> {
        let mut archive = open_archive(bytes)?;
        let snapshot = read_snapshot(&mut archive)?;
        let metadata = read_manifest(&mut archive)?;
        if let Some(metadata) = &metadata {
            check_manifest(metadata, &snapshot)?;
        }
        let asset_entries = archive
            .file_names()
            .filter(|name| {
                name.strip_prefix(ASSET_ENTRY_PREFIX)
                    .is_some_and(|rest| !rest.is_empty() && !rest.ends_with('/'))
            })
            .count();
        Ok(ArchivePreview {
            metadata,
            asset_entries,
            snapshot_size: snapshot.len(),
        })
    }
}

/// Hex SHA-256 of the snapshot bytes, as recorded in the manifest.
#[must_use]
pub fn snapshot_digest(snapshot: &Snapshot) -> String {
    hex::encode(Sha256::digest(snapshot.as_bytes()))
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(ARCHIVE_COMPRESSION_LEVEL.into()))
        .last_modified_time(zip::DateTime::default())
}

#[allow(clippy::needless_pass_by_value)]
fn archive_error(err: impl std::fmt::Display) -> BundleError {
    BundleError::Archive(err.to_string())
}

fn open_archive(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, FormatError> {
    if bytes.is_empty() {
        return Err(FormatError::Empty);
    }
    ZipArchive::new(Cursor::new(bytes)).map_err(|err| FormatError::NotAnArchive(err.to_string()))
}

fn read_snapshot(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Snapshot, FormatError> {
    let mut entry = match archive.by_name(SNAPSHOT_ENTRY) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(FormatError::MissingSnapshotEntry),
        Err(err) => return Err(FormatError::NotAnArchive(err.to_string())),
    };
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| FormatError::NotAnArchive(format!("snapshot entry unreadable: {err}")))?;
    Snapshot::from_bytes(bytes)
}

fn read_manifest(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<Option<ArchiveMetadata>, FormatError> {
    let mut entry = match archive.by_name(MANIFEST_ENTRY) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(FormatError::InvalidMetadata(err.to_string())),
    };
    let mut raw = Vec::new();
    entry
        .read_to_end(&mut raw)
        .map_err(|err| FormatError::InvalidMetadata(err.to_string()))?;
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|err| FormatError::InvalidMetadata(err.to_string()))
}

fn check_manifest(metadata: &ArchiveMetadata, snapshot: &Snapshot) -> Result<(), FormatError> {
    if metadata.format_version > ARCHIVE_FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: metadata.format_version,
            supported: ARCHIVE_FORMAT_VERSION,
        });
    }
    if let Some(expected) = &metadata.snapshot_sha256 {
        if !expected.eq_ignore_ascii_case(&snapshot_digest(snapshot)) {
            return Err(FormatError::ChecksumMismatch);
        }
    }
    Ok(())
}
