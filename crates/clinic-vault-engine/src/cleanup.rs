//! Applying retention decisions to a backup folder or, on download-only platforms, to the
//! history ledger.

use std::collections::BTreeSet;

use clinic_vault_core::{
    cleanup_prompt_due, BackupNaming, Dated, Destination, LedgerError, RetentionError,
    RetentionPolicy, DEFAULT_CLEANUP_PROMPT_THRESHOLD,
};
use serde::Serialize;
use time::PrimitiveDateTime;
use tracing::{info, warn};

use crate::services::VaultServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    /// Files in the backup folder are deleted.
    Directory,
    /// Only history entries are dropped; downloaded files are out of reach.
    Ledger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub mode: CleanupMode,
    /// Kept file names, newest day first.
    pub kept: Vec<String>,
    /// Files deleted from the backup folder.
    pub removed: Vec<String>,
    /// History entries dropped for backups the runner cannot reach, such as downloads.
    pub pruned: Vec<String>,
    pub failed: Vec<RemovalFailure>,
}

/// A retention candidate: a file in the backup folder, or a history entry with no file there.
#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    recorded_at: PrimitiveDateTime,
    in_folder: bool,
}

impl Dated for Candidate {
    fn recorded_at(&self) -> PrimitiveDateTime {
        self.recorded_at
    }
}

pub struct RetentionRunner {
    services: VaultServices,
    policy: RetentionPolicy,
    naming: BackupNaming,
    prompt_threshold: usize,
}

impl RetentionRunner {
    #[must_use]
    pub fn new(services: VaultServices, policy: RetentionPolicy, naming: BackupNaming) -> Self {
        Self {
            services,
            policy,
            naming,
            prompt_threshold: DEFAULT_CLEANUP_PROMPT_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_prompt_threshold(mut self, threshold: usize) -> Self {
        self.prompt_threshold = threshold;
        self
    }

    #[must_use]
    pub fn mode(&self) -> CleanupMode {
        if self.services.directory.is_some() {
            CleanupMode::Directory
        } else {
            CleanupMode::Ledger
        }
    }

    /// Whether the retained history is long enough to offer cleanup.
    ///
    /// # Errors
    /// Returns a [`LedgerError`] when history cannot be read.
    pub fn cleanup_due(&self) -> Result<bool, LedgerError> {
        let retained = self.services.history.load_history()?.len();
        Ok(cleanup_prompt_due(retained, self.prompt_threshold))
    }

    /// Apply the retention policy now.
    ///
    /// # Errors
    /// Returns a [`RetentionError`] when the folder cannot be listed or the ledger cannot be
    /// read or written. Individual failed removals are reported in
    /// [`CleanupReport::failed`].
    pub fn run(&self) -> Result<CleanupReport, RetentionError> {
        let report = match &self.services.directory {
            Some(directory) => self.run_directory(directory.as_ref())?,
            None => self.run_ledger()?,
        };
        info!(
            mode = ?report.mode,
            kept = report.kept.len(),
            removed = report.removed.len(),
            pruned = report.pruned.len(),
            failed = report.failed.len(),
            "retention cleanup finished"
        );
        Ok(report)
    }

    /// One decision over folder files and the history entries of backups outside the folder,
    /// so auto backups delivered as downloads are thinned too.
    fn run_directory(&self, directory: &dyn Destination) -> Result<CleanupReport, RetentionError> {
        let listed = directory.list_backups()?;
        let history = self.services.history.load_history()?;

        let on_disk: BTreeSet<&str> = listed.iter().map(|file| file.name.as_str()).collect();
        let mut candidates: Vec<Candidate> = listed
            .iter()
            .filter_map(|file| {
                let parsed = self.naming.parse(&file.name)?;
                Some(Candidate {
                    name: file.name.clone(),
                    recorded_at: parsed.recorded_at,
                    in_folder: true,
                })
            })
            .collect();
        candidates.extend(
            history
                .iter()
                .filter(|item| !on_disk.contains(item.filename.as_str()))
                .map(|item| Candidate {
                    name: item.filename.clone(),
                    recorded_at: item.recorded_at(),
                    in_folder: false,
                }),
        );
        let decision = self.policy.decide(&candidates);

        let mut removed = Vec::new();
        let mut pruned = Vec::new();
        let mut failed = Vec::new();
        for candidate in decision.to_delete {
            let name = candidate.name;
            if !candidate.in_folder {
                pruned.push(name);
                continue;
            }
            match directory.remove_backup(&name) {
                Ok(()) => removed.push(name),
                Err(err) => {
                    warn!(file = %name, error = %err, "failed to remove old backup");
                    failed.push(RemovalFailure {
                        name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let dropped: BTreeSet<&str> = removed.iter().chain(&pruned).map(String::as_str).collect();
        let retained: Vec<_> = history
            .iter()
            .filter(|item| !dropped.contains(item.filename.as_str()))
            .cloned()
            .collect();
        if retained.len() != history.len() {
            self.services.history.save_history(&retained)?;
        }

        Ok(CleanupReport {
            mode: CleanupMode::Directory,
            kept: decision.to_keep.into_iter().map(|candidate| candidate.name).collect(),
            removed,
            pruned,
            failed,
        })
    }

    fn run_ledger(&self) -> Result<CleanupReport, RetentionError> {
        let history = self.services.history.load_history()?;
        let decision = self.policy.decide(&history);
        if !decision.to_delete.is_empty() {
            let keep: BTreeSet<&str> =
                decision.to_keep.iter().map(|item| item.id.as_str()).collect();
            let retained: Vec<_> = history
                .iter()
                .filter(|item| keep.contains(item.id.as_str()))
                .cloned()
                .collect();
            self.services.history.save_history(&retained)?;
        }

        Ok(CleanupReport {
            mode: CleanupMode::Ledger,
            kept: decision.to_keep.into_iter().map(|item| item.filename).collect(),
            removed: Vec::new(),
            pruned: decision.to_delete.into_iter().map(|item| item.filename).collect(),
            failed: Vec::new(),
        })
    }
}
