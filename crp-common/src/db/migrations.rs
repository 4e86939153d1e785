//! Database schema migrations
//!
//! Versioned, idempotent migrations for both stores. Each store tracks its
//! own `schema_version` table.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - deployed stores depend on them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Stay idempotent** - every statement must be safe to run twice

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current primary store schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Current audit store schema version
const CURRENT_AUDIT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Version to migrate from, or None when the store is current (or newer)
async fn needs_migration(pool: &SqlitePool, store: &str, target: i32) -> Result<Option<i32>> {
    let current_version = get_schema_version(pool).await?;

    if current_version == target {
        info!("{} schema is up to date (v{})", store, current_version);
        return Ok(None);
    }

    if current_version > target {
        warn!(
            "{} schema version ({}) is newer than code version ({})",
            store, current_version, target
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(None);
    }

    info!(
        "Running {} migrations: v{} -> v{}",
        store, current_version, target
    );
    Ok(Some(current_version))
}

/// Run all pending primary store migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let Some(current_version) =
        needs_migration(pool, "Primary store", CURRENT_SCHEMA_VERSION).await?
    else {
        return Ok(());
    };

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes for the visibility and matching queries
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: enrolment and identity indexes");

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_enrolments_client ON enrolments(client_id)",
        "CREATE INDEX IF NOT EXISTS idx_enrolments_program_status ON enrolments(program_id, status)",
        "CREATE INDEX IF NOT EXISTS idx_clients_dob ON clients(date_of_birth)",
        "CREATE INDEX IF NOT EXISTS idx_tier_transitions_program ON tier_transitions(program_id)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: enrolment history is append-only
///
/// Rows can never be deleted, an ended enrolment can never be re-opened, and
/// the client/program/start of an enrolment can never be rewritten.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: append-only enrolment triggers");

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS enrolments_no_delete
        BEFORE DELETE ON enrolments
        BEGIN
            SELECT RAISE(ABORT, 'enrolments are append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS enrolments_forward_only
        BEFORE UPDATE ON enrolments
        WHEN NEW.client_id <> OLD.client_id
          OR NEW.program_id <> OLD.program_id
          OR NEW.started_at <> OLD.started_at
          OR (OLD.status = 'ended' AND NEW.status <> 'ended')
        BEGIN
            SELECT RAISE(ABORT, 'enrolment history cannot be rewritten');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Run all pending audit store migrations
pub async fn run_audit_migrations(pool: &SqlitePool) -> Result<()> {
    let Some(current_version) =
        needs_migration(pool, "Audit store", CURRENT_AUDIT_SCHEMA_VERSION).await?
    else {
        return Ok(());
    };

    if current_version < 1 {
        audit_migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Audit migration v1 completed");
    }

    if current_version < 2 {
        audit_migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Audit migration v2 completed");
    }

    if current_version < 3 {
        audit_migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("✓ Audit migration v3 completed");
    }

    Ok(())
}

/// Audit migration v1: history lookup index
async fn audit_migrate_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_access_events_client ON access_events(client_id, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit migration v2: write-once event tables
async fn audit_migrate_v2(pool: &SqlitePool) -> Result<()> {
    for table in ["access_events", "role_switch_events"] {
        for (op, verb) in [("UPDATE", "update"), ("DELETE", "delete")] {
            let statement = format!(
                r#"
                CREATE TRIGGER IF NOT EXISTS {table}_no_{verb}
                BEFORE {op} ON {table}
                BEGIN
                    SELECT RAISE(ABORT, '{table} is append-only');
                END
                "#
            );
            sqlx::query(&statement).execute(pool).await?;
        }
    }

    Ok(())
}

/// Audit migration v3: role switches record the program sets on each side
///
/// Stored as JSON arrays of program ids. Rows written before v3 keep `[]`.
async fn audit_migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running audit migration v3: role switch program sets");

    for column in ["from_programs", "to_programs"] {
        let has_column: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM pragma_table_info('role_switch_events') WHERE name = '{}'",
            column
        ))
        .fetch_one(pool)
        .await?;

        if has_column > 0 {
            info!("  {} column already exists - skipping", column);
            continue;
        }

        sqlx::query(&format!(
            "ALTER TABLE role_switch_events ADD COLUMN {} TEXT NOT NULL DEFAULT '[]'",
            column
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}
