use time::OffsetDateTime;

use crate::model::BackupSettings;

/// Whether an automatic backup is due at `now`.
///
/// Enabled, and either never backed up or at least one cadence threshold has elapsed since
/// the last success. `manual` cadence is never due.
#[must_use]
pub fn needs_auto_backup(settings: &BackupSettings, now: OffsetDateTime) -> bool {
    if !settings.auto_backup_enabled {
        return false;
    }
    let Some(threshold) = settings.auto_backup_interval.threshold() else {
        return false;
    };
    match settings.last_backup_at {
        None => true,
        Some(last) => now - last >= threshold,
    }
}
