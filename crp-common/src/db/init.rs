//! Primary store initialization
//!
//! Creates every table the access boundary reads. Safe to run on every
//! startup: tables use CREATE TABLE IF NOT EXISTS, then versioned migrations
//! run, then default settings are seeded.

use crate::db::{migrations, open_pool, settings};
use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Initialize the primary store and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();
    let pool = open_pool(db_path, 20).await?;

    if newly_created {
        info!("Initialized new primary store: {}", db_path.display());
    } else {
        info!("Opened existing primary store: {}", db_path.display());
    }

    create_schema(&pool).await?;
    migrations::run_migrations(&pool).await?;
    settings::init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create all primary-store tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    settings::create_settings_table(pool).await?;
    create_programs_table(pool).await?;
    create_tier_transitions_table(pool).await?;
    create_clients_table(pool).await?;
    create_emergency_contacts_table(pool).await?;
    create_client_addresses_table(pool).await?;
    create_case_notes_table(pool).await?;
    create_custom_field_values_table(pool).await?;
    create_enrolments_table(pool).await?;
    Ok(())
}

pub(crate) async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_programs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS programs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            tier TEXT NOT NULL DEFAULT 'standard'
                CHECK (tier IN ('standard', 'confidential')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Tier change log, kept apart from the program row so a compliance
/// override is recorded independently of the state it changed.
async fn create_tier_transitions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tier_transitions (
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL REFERENCES programs(id),
            from_tier TEXT NOT NULL,
            to_tier TEXT NOT NULL,
            confirmed_by TEXT NOT NULL,
            override_reference TEXT,
            override_authorized_by TEXT,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_clients_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT,
            date_of_birth TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_emergency_contacts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emergency_contacts (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            name TEXT NOT NULL,
            phone TEXT,
            relationship TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_client_addresses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS client_addresses (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            line1 TEXT NOT NULL,
            city TEXT,
            postal_code TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_case_notes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_notes (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            program_id TEXT NOT NULL REFERENCES programs(id),
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_custom_field_values_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS custom_field_values (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            field_name TEXT NOT NULL,
            value TEXT,
            UNIQUE (client_id, field_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_enrolments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrolments (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            program_id TEXT NOT NULL REFERENCES programs(id),
            status TEXT NOT NULL DEFAULT 'enrolled'
                CHECK (status IN ('enrolled', 'ended')),
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
