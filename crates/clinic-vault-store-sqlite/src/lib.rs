//! `SQLite` adapters for the vault: the clinic database as a [`RelationalEngine`] and a small
//! ledger database for backup settings and history.
//!
//! [`RelationalEngine`]: clinic_vault_core::RelationalEngine

mod engine;
mod ledger;

pub use engine::{ForeignKeyViolation, IntegrityReport, SqliteEngine};
pub use ledger::SqliteLedger;
