//! SQLite persistence for the storage subsystem.
//!
//! Two concerns live here:
//! - **Settings**: flat key/value rows (`storage_driver`, `storage_s3_*`,
//!   ...) that the provider factory resolves into a storage configuration.
//! - **Migration ledger**: one row per legacy file handled by the migration
//!   engine, tracking status, destination, and checksum so interrupted runs
//!   resume instead of re-copying.
//!
//! The schema is embedded as sqlx migrations and applied on connect.

mod db;
pub mod error;
mod ledger;
mod settings;

pub use crate::db::Database;
pub use crate::ledger::{MigrationLedger, MigrationRecord, MigrationStatus};
pub use crate::settings::SettingsRepository;
