//! Database row models
//!
//! Raw rows as stored. Identifiers and timestamps are TEXT; conversion into
//! typed domain values happens in the access layer.

use serde::{Deserialize, Serialize};

/// `programs` row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProgramRow {
    pub id: String,
    pub name: String,
    pub tier: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Core identity columns of a `clients` row
///
/// This is the only client shape the matching path may load.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientIdentityRow {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub created_at: String,
}

/// `enrolments` row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnrolmentRow {
    pub id: String,
    pub client_id: String,
    pub program_id: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
}

/// `access_events` row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessEventRow {
    pub seq: i64,
    pub event_id: String,
    pub principal_id: String,
    pub active_role: String,
    pub occurred_at: String,
    pub client_id: String,
    pub action: String,
    pub outcome: String,
    pub prev_hash: String,
    pub event_hash: String,
}
