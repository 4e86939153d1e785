//! Database-backed settings
//!
//! Key/value pairs in the primary store's `settings` table. Defaults are
//! seeded idempotently at startup; a NULL value is reset to its default.

use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Small-cell suppression threshold for confidential aggregates
pub const SUPPRESSION_THRESHOLD_KEY: &str = "suppression_threshold";
pub const DEFAULT_SUPPRESSION_THRESHOLD: u32 = 10;

/// Maximum number of duplicate candidates returned per match request
pub const MATCH_RESULT_LIMIT_KEY: &str = "match_result_limit";
pub const DEFAULT_MATCH_RESULT_LIMIT: u32 = 5;

/// Shared secret for request signatures; 0 disables checking
pub const API_SHARED_SECRET_KEY: &str = "api_shared_secret";

/// Create the settings table
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or repair default settings
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(
        pool,
        SUPPRESSION_THRESHOLD_KEY,
        &DEFAULT_SUPPRESSION_THRESHOLD.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        MATCH_RESULT_LIMIT_KEY,
        &DEFAULT_MATCH_RESULT_LIMIT.to_string(),
    )
    .await?;
    crate::api::signature::ensure_shared_secret(pool).await?;
    Ok(())
}

/// Insert a setting if missing, or reset it if NULL
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        None => {
            // INSERT OR IGNORE handles concurrent initialization
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query(
                "UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?",
            )
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
            info!("Reset NULL setting '{}' to default value: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

/// Read a raw setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.flatten())
}

/// Write a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Read a positive integer setting, falling back to `default` when missing
pub async fn get_u32_setting(pool: &SqlitePool, key: &str, default: u32) -> Result<u32> {
    match get_setting(pool, key).await? {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(0) | Err(_) => Err(Error::Config(format!(
                "Setting '{}' must be a positive integer, found '{}'",
                key, raw
            ))),
            Ok(v) => Ok(v),
        },
    }
}

/// Suppression threshold for small-cell aggregates
pub async fn load_suppression_threshold(pool: &SqlitePool) -> Result<u32> {
    get_u32_setting(pool, SUPPRESSION_THRESHOLD_KEY, DEFAULT_SUPPRESSION_THRESHOLD).await
}

/// Candidate cap for duplicate matching
pub async fn load_match_result_limit(pool: &SqlitePool) -> Result<u32> {
    get_u32_setting(pool, MATCH_RESULT_LIMIT_KEY, DEFAULT_MATCH_RESULT_LIMIT).await
}
