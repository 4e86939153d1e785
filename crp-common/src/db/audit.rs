//! Audit store initialization
//!
//! The audit store is its own SQLite file behind its own pool. Nothing in
//! the primary store's write path can reach it, so losing or compromising
//! the primary store does not erase access history.

use crate::db::{init::create_schema_version_table, migrations, open_pool};
use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Initialize the audit store and create tables if needed
pub async fn init_audit_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Appends are serialized by the hash chain, a small pool is enough
    let pool = open_pool(db_path, 4).await?;

    if newly_created {
        info!("Initialized new audit store: {}", db_path.display());
    } else {
        info!("Opened existing audit store: {}", db_path.display());
    }

    create_audit_schema(&pool).await?;
    migrations::run_audit_migrations(&pool).await?;

    Ok(pool)
}

/// Create all audit-store tables (idempotent)
pub async fn create_audit_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS access_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL UNIQUE,
            principal_id TEXT NOT NULL,
            active_role TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            client_id TEXT NOT NULL,
            action TEXT NOT NULL,
            outcome TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            event_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS role_switch_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            from_role TEXT NOT NULL,
            to_role TEXT NOT NULL,
            occurred_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
