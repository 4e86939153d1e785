//! Request signatures for the inbound session-layer boundary
//!
//! Every `/api/*` request carries two headers:
//! - `X-CRP-Timestamp`: Unix epoch milliseconds, at most 1000 ms old and at
//!   most 1 ms in the future
//! - `X-CRP-Signature`: lowercase hex SHA-256 over
//!   `timestamp \n METHOD \n path \n body \n secret`
//!
//! The shared secret lives in the `settings` table. The special value 0
//! disables checking, which is how tests and single-host deployments run.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::settings::{get_setting, API_SHARED_SECRET_KEY};

pub const TIMESTAMP_HEADER: &str = "x-crp-timestamp";
pub const SIGNATURE_HEADER: &str = "x-crp-signature";

/// Maximum accepted request age
pub const MAX_PAST_MS: i64 = 1000;
/// Maximum accepted clock skew into the future
pub const MAX_FUTURE_MS: i64 = 1;

/// Signature validation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Database error: {0}")]
    Database(String),
}

/// Load the shared secret, 0 when absent
pub async fn load_shared_secret(db: &SqlitePool) -> Result<i64, SignatureError> {
    let value = get_setting(db, API_SHARED_SECRET_KEY)
        .await
        .map_err(|e| SignatureError::Database(e.to_string()))?;

    match value {
        None => Ok(0),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|e| SignatureError::Database(format!("Invalid i64: {}", e))),
    }
}

/// Generate and store a non-zero secret unless one is already present
pub async fn ensure_shared_secret(db: &SqlitePool) -> crate::Result<()> {
    use rand::Rng;

    if get_setting(db, API_SHARED_SECRET_KEY).await?.is_some() {
        return Ok(());
    }

    let mut rng = rand::thread_rng();
    let secret: i64 = loop {
        let val = rng.gen::<i64>();
        if val != 0 {
            break val;
        }
    };

    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(API_SHARED_SECRET_KEY)
        .bind(secret.to_string())
        .execute(db)
        .await?;

    Ok(())
}

/// Validate the request timestamp against `now_ms`
pub fn validate_timestamp_at(timestamp: i64, now_ms: i64) -> Result<(), SignatureError> {
    let diff = now_ms.checked_sub(timestamp).ok_or_else(|| {
        SignatureError::InvalidTimestamp(format!("Timestamp {} out of range", timestamp))
    })?;

    if diff > MAX_PAST_MS {
        return Err(SignatureError::InvalidTimestamp(format!(
            "Timestamp {}ms too old (max {}ms past)",
            diff, MAX_PAST_MS
        )));
    }

    if diff < -MAX_FUTURE_MS {
        return Err(SignatureError::InvalidTimestamp(format!(
            "Timestamp {}ms in future (max {}ms future)",
            diff.unsigned_abs(),
            MAX_FUTURE_MS
        )));
    }

    Ok(())
}

/// Validate the request timestamp against the current clock
pub fn validate_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    validate_timestamp_at(timestamp, crate::time::now_millis())
}

/// Compute the signature for a request
///
/// ```
/// use crp_common::api::signature::calculate_signature;
///
/// let sig = calculate_signature(1_730_000_000_000, "POST", "/api/clients/visible", b"{}", 42);
/// assert_eq!(sig.len(), 64);
/// ```
pub fn calculate_signature(
    timestamp: i64,
    method: &str,
    path: &str,
    body: &[u8],
    shared_secret: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hasher.update(b"\n");
    hasher.update(shared_secret.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check a provided signature
pub fn validate_signature(
    provided: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &[u8],
    shared_secret: i64,
) -> Result<(), SignatureError> {
    let calculated = calculate_signature(timestamp, method, path, body, shared_secret);
    if constant_time_eq(provided.as_bytes(), calculated.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::InvalidSignature)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
