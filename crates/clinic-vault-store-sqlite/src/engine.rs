use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use clinic_vault_core::{EngineError, RelationalEngine};
use rusqlite::{Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    /// `None` for `WITHOUT ROWID` tables.
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
}

/// The clinic's `SQLite` database, exposed to the vault as an exportable byte image.
///
/// An engine can exist before its database is opened (the app opens it after login); export
/// and load report [`EngineError::StoreUninitialized`] until then.
pub struct SqliteEngine {
    conn: Mutex<Option<Connection>>,
}

impl Default for SqliteEngine {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl SqliteEngine {
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            conn: Mutex::new(None),
        }
    }

    /// Open a file-backed database and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let engine = Self::uninitialized();
        engine.initialize(path)?;
        Ok(engine)
    }

    /// # Errors
    /// Returns an error when the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open `path` as the live database, replacing any connection already held.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or configured.
    pub fn initialize(&self, path: &Path) -> Result<()> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        configure(&conn)?;
        *self.lock()? = Some(conn);
        Ok(())
    }

    /// Close the live database. Later exports report an uninitialized store.
    ///
    /// # Errors
    /// Returns an error when the connection cannot be closed cleanly.
    pub fn close(&self) -> Result<()> {
        let taken = self.lock()?.take();
        if let Some(conn) = taken {
            conn.close()
                .map_err(|(_, err)| err)
                .context("failed to close sqlite database")?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Run `f` against the live connection.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or `f` fails.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(EngineError::StoreUninitialized)?;
        f(conn).context("sqlite statement failed")
    }

    /// Run `quick_check` and `foreign_key_check` on the live database.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized or either pragma fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(EngineError::StoreUninitialized)?;
        integrity_report(conn)
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, Option<Connection>>, EngineError> {
        self.conn
            .lock()
            .map_err(|_| EngineError::LoadFailed("sqlite connection lock poisoned".to_string()))
    }
}

impl RelationalEngine for SqliteEngine {
    fn export_image(&self) -> Result<Vec<u8>, EngineError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(EngineError::StoreUninitialized)?;
        export_image(conn).map_err(|err| EngineError::ExportFailed(format!("{err:#}")))
    }

    fn load_image(&self, image: &[u8]) -> Result<(), EngineError> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(EngineError::StoreUninitialized)?;
        load_image(conn, image).map_err(|err| EngineError::LoadFailed(format!("{err:#}")))
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .context("failed to configure sqlite pragmas")
}

/// Copy the live database through the online backup API, which includes committed WAL
/// content, then switch the copy to rollback journaling so the image stands alone.
fn export_image(conn: &Connection) -> Result<Vec<u8>> {
    let staged = NamedTempFile::new().context("failed to create staging file for export")?;
    conn.backup(DatabaseName::Main, staged.path(), None)
        .context("failed to copy live database to staging file")?;

    {
        let copy = Connection::open(staged.path()).context("failed to reopen staged copy")?;
        let mode: String = copy
            .query_row("PRAGMA journal_mode = DELETE", [], |row| row.get(0))
            .context("failed to normalize journal mode of staged copy")?;
        if !mode.eq_ignore_ascii_case("delete") {
            return Err(anyhow!("staged copy kept journal mode {mode}"));
        }
    }

    fs::read(staged.path())
        .with_context(|| format!("failed to read staged copy {}", staged.path().display()))
}

/// Stage the image in a scratch database and check it there first, so an image the engine
/// cannot decode never reaches the live connection.
fn load_image(conn: &mut Connection, image: &[u8]) -> Result<()> {
    let staged = NamedTempFile::new().context("failed to create staging file for restore")?;
    fs::write(staged.path(), image)
        .with_context(|| format!("failed to write staging file {}", staged.path().display()))?;

    let mut scratch = Connection::open_in_memory().context("failed to open scratch database")?;
    scratch
        .restore(
            DatabaseName::Main,
            staged.path(),
            None::<fn(rusqlite::backup::Progress)>,
        )
        .context("snapshot could not be read as a database")?;
    let report = integrity_report(&scratch)?;
    if !report.quick_check_ok {
        return Err(anyhow!(
            "snapshot failed quick_check: {}",
            report.quick_check_message
        ));
    }
    drop(scratch);

    conn.restore(
        DatabaseName::Main,
        staged.path(),
        None::<fn(rusqlite::backup::Progress)>,
    )
    .context("failed to replace live database")?;
    Ok(())
}

fn integrity_report(conn: &Connection) -> Result<IntegrityReport> {
    let quick_check_message: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
        .context("failed to run PRAGMA quick_check")?;

    let mut stmt = conn
        .prepare("PRAGMA foreign_key_check")
        .context("failed to prepare PRAGMA foreign_key_check")?;
    let foreign_key_violations = stmt
        .query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get("table")?,
                rowid: row.get("rowid")?,
                parent: row.get("parent")?,
                fk_index: row.get("fkid")?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read PRAGMA foreign_key_check rows")?;

    Ok(IntegrityReport {
        quick_check_ok: quick_check_message == "ok",
        quick_check_message,
        foreign_key_violations,
    })
}

#[cfg(test)]
mod tests {
    use clinic_vault_core::{check_signature, SNAPSHOT_SIGNATURE};

    use super::*;

    fn seeded() -> Result<SqliteEngine> {
        let engine = SqliteEngine::open_in_memory()?;
        engine.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE patients (id TEXT PRIMARY KEY, name TEXT NOT NULL);
                 INSERT INTO patients (id, name) VALUES ('p1', 'Kim');",
            )
        })?;
        Ok(engine)
    }

    fn patient_count(engine: &SqliteEngine) -> Result<i64> {
        engine.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
        })
    }

    #[test]
    fn uninitialized_engine_reports_store_uninitialized() {
        let engine = SqliteEngine::uninitialized();
        assert!(!engine.is_initialized());
        assert_eq!(engine.export_image(), Err(EngineError::StoreUninitialized));
        assert_eq!(
            engine.load_image(SNAPSHOT_SIGNATURE),
            Err(EngineError::StoreUninitialized)
        );
    }

    #[test]
    fn export_image_carries_sqlite_signature() -> Result<()> {
        let image = seeded()?.export_image()?;
        assert_eq!(check_signature(&image), Ok(()));
        Ok(())
    }

    #[test]
    fn load_rejects_signature_with_undecodable_body_and_keeps_live_data() -> Result<()> {
        let engine = seeded()?;
        let mut bogus = SNAPSHOT_SIGNATURE.to_vec();
        bogus.extend_from_slice(&[0_u8; 512]);
        assert_eq!(check_signature(&bogus), Ok(()));

        let result = engine.load_image(&bogus);
        assert!(matches!(result, Err(EngineError::LoadFailed(_))));
        assert_eq!(patient_count(&engine)?, 1);
        Ok(())
    }

    #[test]
    fn closing_engine_makes_export_fail() -> Result<()> {
        let engine = seeded()?;
        engine.close()?;
        assert_eq!(engine.export_image(), Err(EngineError::StoreUninitialized));
        Ok(())
    }

    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let report = seeded()?.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        Ok(())
    }

    #[test]
    fn foreign_key_violations_in_without_rowid_tables_are_reported() -> Result<()> {
        let engine = seeded()?;
        engine.with_connection(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = OFF;
                 CREATE TABLE herb_stock (
                   herb TEXT PRIMARY KEY,
                   patient_id TEXT REFERENCES patients(id)
                 ) WITHOUT ROWID;
                 INSERT INTO herb_stock (herb, patient_id) VALUES ('ginseng', 'missing');
                 CREATE TABLE visits (id INTEGER PRIMARY KEY, patient_id TEXT REFERENCES patients(id));
                 INSERT INTO visits (id, patient_id) VALUES (7, 'missing');
                 PRAGMA foreign_keys = ON;",
            )
        })?;

        let mut violations = engine.integrity_check()?.foreign_key_violations;
        violations.sort_by(|a, b| a.table.cmp(&b.table));
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].table, "herb_stock");
        assert_eq!(violations[0].rowid, None);
        assert_eq!(violations[1].table, "visits");
        assert_eq!(violations[1].rowid, Some(7));
        assert_eq!(violations[1].parent, "patients");
        Ok(())
    }
}
