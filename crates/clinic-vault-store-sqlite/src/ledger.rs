use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clinic_vault_core::{
    AutoBackupInterval, BackupHistoryItem, BackupKind, BackupSettings, HistoryLedger, LedgerError,
    SettingsStore,
};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

const LEDGER_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS backup_settings (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  auto_backup_enabled INTEGER NOT NULL CHECK (auto_backup_enabled IN (0, 1)),
  auto_backup_interval TEXT NOT NULL CHECK (auto_backup_interval IN ('daily','weekly','manual')),
  last_backup_at TEXT,
  backup_folder_name TEXT
);

CREATE TABLE IF NOT EXISTS backup_history (
  position INTEGER PRIMARY KEY,
  id TEXT NOT NULL UNIQUE,
  filename TEXT NOT NULL,
  created_at TEXT NOT NULL,
  size INTEGER NOT NULL CHECK (size >= 0),
  kind TEXT NOT NULL CHECK (kind IN ('manual','auto'))
);
";

/// Backup settings and history kept in their own small database, separate from the clinic
/// database so a restore never rewrites them.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// # Errors
    /// Returns an error when the ledger database cannot be opened or its schema applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open ledger database at {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// # Errors
    /// Returns an error when the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory ledger")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .context("failed to configure ledger pragmas")?;
        conn.execute_batch(LEDGER_SCHEMA_SQL)
            .context("failed to apply ledger schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_settings(&self) -> Result<BackupSettings> {
        let conn = self.conn.lock().map_err(|_| anyhow!("ledger lock poisoned"))?;
        let row = conn
            .query_row(
                "SELECT auto_backup_enabled, auto_backup_interval, last_backup_at, backup_folder_name
                 FROM backup_settings WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to read backup settings")?;

        let Some((enabled, interval, last_backup_at, folder)) = row else {
            return Ok(BackupSettings::default());
        };
        Ok(BackupSettings {
            auto_backup_enabled: enabled,
            auto_backup_interval: AutoBackupInterval::parse(&interval)
                .ok_or_else(|| anyhow!("unknown backup interval {interval}"))?,
            last_backup_at: last_backup_at.as_deref().map(parse_rfc3339).transpose()?,
            backup_folder_name: folder,
        })
    }

    fn write_settings(&self, settings: &BackupSettings) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("ledger lock poisoned"))?;
        let last_backup_at = settings.last_backup_at.map(rfc3339).transpose()?;
        conn.execute(
            "INSERT OR REPLACE INTO backup_settings
               (id, auto_backup_enabled, auto_backup_interval, last_backup_at, backup_folder_name)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                settings.auto_backup_enabled,
                settings.auto_backup_interval.as_str(),
                last_backup_at,
                settings.backup_folder_name,
            ],
        )
        .context("failed to write backup settings")?;
        Ok(())
    }

    fn read_history(&self) -> Result<Vec<BackupHistoryItem>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("ledger lock poisoned"))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, filename, created_at, size, kind
                 FROM backup_history ORDER BY position ASC",
            )
            .context("failed to prepare history query")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (id, filename, created_at, size, kind) = row?;
            history.push(BackupHistoryItem {
                id,
                filename,
                created_at: parse_rfc3339(&created_at)?,
                size: u64::try_from(size).with_context(|| format!("negative size {size}"))?,
                kind: BackupKind::parse(&kind)
                    .ok_or_else(|| anyhow!("unknown backup kind {kind}"))?,
            });
        }
        Ok(history)
    }

    fn write_history(&self, history: &[BackupHistoryItem]) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|_| anyhow!("ledger lock poisoned"))?;
        let tx = conn.transaction().context("failed to begin history transaction")?;
        tx.execute("DELETE FROM backup_history", [])
            .context("failed to clear history")?;
        for (position, item) in history.iter().enumerate() {
            tx.execute(
                "INSERT INTO backup_history (position, id, filename, created_at, size, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    i64::try_from(position)?,
                    item.id,
                    item.filename,
                    rfc3339(item.created_at)?,
                    i64::try_from(item.size)?,
                    item.kind.as_str(),
                ],
            )
            .with_context(|| format!("failed to insert history item {}", item.id))?;
        }
        tx.commit().context("failed to commit history")?;
        Ok(())
    }
}

impl SettingsStore for SqliteLedger {
    fn load_settings(&self) -> Result<BackupSettings, LedgerError> {
        self.read_settings().map_err(storage_error)
    }

    fn save_settings(&self, settings: &BackupSettings) -> Result<(), LedgerError> {
        self.write_settings(settings).map_err(storage_error)
    }
}

impl HistoryLedger for SqliteLedger {
    fn load_history(&self) -> Result<Vec<BackupHistoryItem>, LedgerError> {
        self.read_history().map_err(storage_error)
    }

    fn save_history(&self, history: &[BackupHistoryItem]) -> Result<(), LedgerError> {
        self.write_history(history).map_err(storage_error)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn storage_error(err: anyhow::Error) -> LedgerError {
    LedgerError::Storage(format!("{err:#}"))
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
