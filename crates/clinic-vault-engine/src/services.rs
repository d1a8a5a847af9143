use std::sync::Arc;

use clinic_vault_core::{
    AssetStore, Clock, Destination, HistoryLedger, RelationalEngine, SettingsStore, SystemClock,
};

/// The collaborators every vault operation draws on.
///
/// `directory` is `None` on platforms without folder access; backups there go through
/// `download` and cleanup works on the ledger alone.
#[derive(Clone)]
pub struct VaultServices {
    pub engine: Arc<dyn RelationalEngine>,
    pub assets: Option<Arc<dyn AssetStore>>,
    pub settings: Arc<dyn SettingsStore>,
    pub history: Arc<dyn HistoryLedger>,
    pub directory: Option<Arc<dyn Destination>>,
    pub download: Arc<dyn Destination>,
    pub clock: Arc<dyn Clock>,
}

impl VaultServices {
    /// Services with no asset store, no directory destination, and the system clock.
    #[must_use]
    pub fn new<L>(
        engine: Arc<dyn RelationalEngine>,
        ledger: Arc<L>,
        download: Arc<dyn Destination>,
    ) -> Self
    where
        L: SettingsStore + HistoryLedger + 'static,
    {
        Self {
            engine,
            assets: None,
            settings: ledger.clone(),
            history: ledger,
            directory: None,
            download,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_assets(mut self, assets: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(assets);
        self
    }

    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn Destination>) -> Self {
        self.directory = Some(directory);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
