//! Backup filenames: `{prefix}_{YYYY-MM-DD}_{HH-MM-SS}.{ext}`.
//!
//! The same pattern drives directory-mode retention, so parsing is strict: the exact prefix,
//! a full seconds-resolution stamp, and one of the two known extensions.

use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

pub const DEFAULT_FILE_PREFIX: &str = "clinic_backup";
pub const DEFAULT_SNAPSHOT_EXTENSION: &str = "db";
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "zip";

const STAMP_LEN: usize = "YYYY-MM-DD_HH-MM-SS".len();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupFormat {
    /// A bare database image.
    Snapshot,
    /// A ZIP bundle of database image, assets, and manifest.
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedBackupName {
    pub recorded_at: PrimitiveDateTime,
    pub format: BackupFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNaming {
    prefix: String,
    snapshot_extension: String,
    archive_extension: String,
}

impl Default for BackupNaming {
    fn default() -> Self {
        Self::new(
            DEFAULT_FILE_PREFIX,
            DEFAULT_SNAPSHOT_EXTENSION,
            DEFAULT_ARCHIVE_EXTENSION,
        )
    }
}

impl BackupNaming {
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        snapshot_extension: impl Into<String>,
        archive_extension: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            snapshot_extension: snapshot_extension.into(),
            archive_extension: archive_extension.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn extension(&self, format: BackupFormat) -> &str {
        match format {
            BackupFormat::Snapshot => &self.snapshot_extension,
            BackupFormat::Archive => &self.archive_extension,
        }
    }

    #[must_use]
    pub fn file_name(&self, at: PrimitiveDateTime, format: BackupFormat) -> String {
        format!(
            "{}_{:04}-{:02}-{:02}_{:02}-{:02}-{:02}.{}",
            self.prefix,
            at.year(),
            u8::from(at.month()),
            at.day(),
            at.hour(),
            at.minute(),
            at.second(),
            self.extension(format),
        )
    }

    /// Parse a file name produced by [`BackupNaming::file_name`]. Returns `None` for anything
    /// else, which directory cleanup then leaves alone.
    #[must_use]
    pub fn parse(&self, name: &str) -> Option<ParsedBackupName> {
        let rest = name.strip_prefix(self.prefix.as_str())?.strip_prefix('_')?;
        let (stamp, extension) = rest.rsplit_once('.')?;
        let format = if extension == self.snapshot_extension {
            BackupFormat::Snapshot
        } else if extension == self.archive_extension {
            BackupFormat::Archive
        } else {
            return None;
        };
        if stamp.len() != STAMP_LEN {
            return None;
        }
        let recorded_at = PrimitiveDateTime::parse(
            stamp,
            format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]"),
        )
        .ok()?;
        Some(ParsedBackupName {
            recorded_at,
            format,
        })
    }
}

/// Wall-clock reading of a timestamp in the offset it was recorded with.
#[must_use]
pub fn wall_clock(at: OffsetDateTime) -> PrimitiveDateTime {
    PrimitiveDateTime::new(at.date(), at.time())
}
