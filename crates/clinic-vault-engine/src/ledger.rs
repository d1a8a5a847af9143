use clinic_vault_core::{
    BackupHistoryItem, BackupSettings, HistoryLedger, LedgerError, SettingsStore,
};
use parking_lot::Mutex;

/// Settings and history held in process memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    settings: Mutex<BackupSettings>,
    history: Mutex<Vec<BackupHistoryItem>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_settings(settings: BackupSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            history: Mutex::new(Vec::new()),
        }
    }
}

impl SettingsStore for MemoryLedger {
    fn load_settings(&self) -> Result<BackupSettings, LedgerError> {
        Ok(self.settings.lock().clone())
    }

    fn save_settings(&self, settings: &BackupSettings) -> Result<(), LedgerError> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

impl HistoryLedger for MemoryLedger {
    fn load_history(&self) -> Result<Vec<BackupHistoryItem>, LedgerError> {
        Ok(self.history.lock().clone())
    }

    fn save_history(&self, history: &[BackupHistoryItem]) -> Result<(), LedgerError> {
        *self.history.lock() = history.to_vec();
        Ok(())
    }
}
