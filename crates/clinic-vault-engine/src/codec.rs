use std::sync::Arc;

use clinic_vault_core::{EngineError, FormatError, RelationalEngine, Snapshot};
use tracing::{debug, info};

/// Moves the live relational store to and from portable snapshot bytes.
#[derive(Clone)]
pub struct SnapshotCodec {
    engine: Arc<dyn RelationalEngine>,
}

impl SnapshotCodec {
    #[must_use]
    pub fn new(engine: Arc<dyn RelationalEngine>) -> Self {
        Self { engine }
    }

    /// Point-in-time image of the live store. Never mutates the store.
    ///
    /// # Errors
    /// [`EngineError::StoreUninitialized`] when no store is open, or
    /// [`EngineError::ExportFailed`] when the engine produced something that is not a snapshot.
    pub fn export(&self) -> Result<Snapshot, EngineError> {
        let image = self.engine.export_image()?;
        let size = image.len();
        let snapshot = Snapshot::from_bytes(image)
            .map_err(|err| EngineError::ExportFailed(format!("engine image invalid: {err}")))?;
        debug!(size, "exported snapshot");
        Ok(snapshot)
    }

    /// Signature-only validation of externally supplied bytes.
    ///
    /// # Errors
    /// Returns the [`FormatError`] describing why the bytes are not a snapshot.
    pub fn validate(bytes: Vec<u8>) -> Result<Snapshot, FormatError> {
        Snapshot::from_bytes(bytes)
    }

    /// Replace the live store with `snapshot`.
    ///
    /// # Errors
    /// Returns the engine's error unchanged; a failed load is never retried.
    pub fn apply(&self, snapshot: &Snapshot) -> Result<(), EngineError> {
        self.engine.load_image(snapshot.as_bytes())?;
        info!(size = snapshot.len(), "applied snapshot to live store");
        Ok(())
    }
}
