//! Database initialization, migrations and row models
//!
//! Two physically separate SQLite stores:
//! - the primary store (programs, clients, enrolments, settings)
//! - the audit store (append-only access and role-switch events)

pub mod audit;
pub mod init;
pub mod migrations;
pub mod models;
pub mod settings;

pub use audit::init_audit_database;
pub use init::init_database;
pub use migrations::{run_audit_migrations, run_migrations};
pub use models::*;
pub use settings::*;

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Open (creating if needed) a SQLite file with the pragmas every CRP store
/// relies on: WAL, foreign keys, and a busy timeout.
pub(crate) async fn open_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}
