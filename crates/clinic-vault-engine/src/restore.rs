use std::fmt::{Display, Formatter};
use std::sync::Arc;

use clinic_vault_core::{
    ArchiveMetadata, Asset, AssetStore, AssetWarning, PartialAssetLoss, RelationalEngine,
    RestoreError, Snapshot,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::bundle::AssetBundler;
use crate::codec::SnapshotCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    Validating,
    Applying,
    Done,
    Rejected,
}

impl RestorePhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Applying => "applying",
            Self::Done => "done",
            Self::Rejected => "rejected",
        }
    }
}

impl Display for RestorePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// A bare snapshot file.
    Snapshot,
    /// A ZIP archive with snapshot, assets and manifest.
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub mode: RestoreMode,
    pub snapshot_size: usize,
    pub assets_restored: usize,
    pub warnings: Vec<AssetWarning>,
    pub metadata: Option<ArchiveMetadata>,
}

impl RestoreReport {
    /// Assets that were in the archive but did not make it into the asset store.
    #[must_use]
    pub fn partial_asset_loss(&self) -> Option<PartialAssetLoss> {
        if self.warnings.is_empty() {
            return None;
        }
        Some(PartialAssetLoss {
            lost: self.warnings.len(),
            names: self.warnings.iter().map(|w| w.name.clone()).collect(),
        })
    }
}

/// Validates supplied bytes and, only when they pass, replaces the live store with them.
///
/// Phases run `Idle -> Validating -> Applying -> Done`, or end in `Rejected`. Nothing touches
/// the live store before `Applying`.
pub struct RestoreExecutor {
    codec: SnapshotCodec,
    bundler: AssetBundler,
    assets: Option<Arc<dyn AssetStore>>,
    phase: Mutex<RestorePhase>,
}

impl RestoreExecutor {
    #[must_use]
    pub fn new(engine: Arc<dyn RelationalEngine>, assets: Option<Arc<dyn AssetStore>>) -> Self {
        Self {
            codec: SnapshotCodec::new(engine),
            bundler: AssetBundler::new(),
            assets,
            phase: Mutex::new(RestorePhase::Idle),
        }
    }

    #[must_use]
    pub fn phase(&self) -> RestorePhase {
        *self.phase.lock()
    }

    /// # Errors
    /// [`RestoreError::Rejected`] when validation fails (the live store is untouched), or
    /// [`RestoreError::Engine`] when the engine refuses the snapshot.
    pub fn restore(&self, mode: RestoreMode, bytes: &[u8]) -> Result<RestoreReport, RestoreError> {
        self.enter(RestorePhase::Validating);
        let validated = match self.validate(mode, bytes) {
            Ok(validated) => validated,
            Err(err) => {
                warn!(%mode, error = %err, "restore rejected during validation");
                self.enter(RestorePhase::Rejected);
                return Err(err);
            }
        };

        self.enter(RestorePhase::Applying);
        if let Err(err) = self.codec.apply(&validated.snapshot) {
            warn!(%mode, error = %err, "engine refused snapshot");
            self.enter(RestorePhase::Rejected);
            return Err(err.into());
        }

        let mut warnings = validated.warnings;
        let assets_restored = self.write_assets(validated.assets, &mut warnings);
        self.enter(RestorePhase::Done);

        info!(
            %mode,
            snapshot_size = validated.snapshot.len(),
            assets_restored,
            assets_lost = warnings.len(),
            "restore completed"
        );
        Ok(RestoreReport {
            mode,
            snapshot_size: validated.snapshot.len(),
            assets_restored,
            warnings,
            metadata: validated.metadata,
        })
    }

    fn enter(&self, phase: RestorePhase) {
        *self.phase.lock() = phase;
    }

    fn validate(&self, mode: RestoreMode, bytes: &[u8]) -> Result<Validated, RestoreError> {
        match mode {
            RestoreMode::Snapshot => Ok(Validated {
                snapshot: SnapshotCodec::validate(bytes.to_vec())?,
                assets: Vec::new(),
                metadata: None,
                warnings: Vec::new(),
            }),
            RestoreMode::Archive => {
                let unpacked = self.bundler.unpack(bytes)?;
                Ok(Validated {
                    snapshot: unpacked.snapshot,
                    assets: unpacked.assets,
                    metadata: unpacked.metadata,
                    warnings: unpacked.warnings,
                })
            }
        }
    }

    fn write_assets(&self, assets: Vec<Asset>, warnings: &mut Vec<AssetWarning>) -> usize {
        let Some(store) = &self.assets else {
            for asset in assets {
                warnings.push(AssetWarning {
                    name: asset.name,
                    reason: "no asset store available".to_string(),
                });
            }
            return 0;
        };

        let mut written = 0;
        for asset in assets {
            match store.write(&asset.name, &asset.bytes) {
                Ok(()) => written += 1,
                Err(err) => {
                    warn!(asset = %asset.name, error = %err, "failed to restore asset");
                    warnings.push(AssetWarning {
                        name: asset.name,
                        reason: err.to_string(),
                    });
                }
            }
        }
        written
    }
}

impl Display for RestoreMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Snapshot => write!(f, "snapshot"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

struct Validated {
    snapshot: Snapshot,
    assets: Vec<Asset>,
    metadata: Option<ArchiveMetadata>,
    warnings: Vec<AssetWarning>,
}
