//! Client record workflows
//!
//! Program-administration writes that populate the primary store: clients,
//! their satellite data and enrolments. None of these return client data to
//! a principal, so none of them go through the visibility filter.
//!
//! Enrolments are append-only. The only mutation is `enrolled -> ended`.

use chrono::{DateTime, NaiveDate, Utc};
use crp_common::db::{ClientIdentityRow, EnrolmentRow};
use crp_common::{time, ClientId, EnrolmentId, ProgramId};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{AccessError, Result};

/// Enrolment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrolmentStatus {
    Enrolled,
    Ended,
}

impl EnrolmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrolmentStatus::Enrolled => "enrolled",
            EnrolmentStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "enrolled" => Ok(EnrolmentStatus::Enrolled),
            "ended" => Ok(EnrolmentStatus::Ended),
            other => Err(AccessError::InvalidInput(format!(
                "Unknown enrolment status '{}'",
                other
            ))),
        }
    }
}

/// One client-in-program enrolment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrolment {
    pub id: EnrolmentId,
    pub client_id: ClientId,
    pub program_id: ProgramId,
    pub status: EnrolmentStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Enrolment {
    pub fn is_active(&self) -> bool {
        self.status == EnrolmentStatus::Enrolled
    }

    /// Most recent activity: end time if ended, otherwise start time
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.ended_at.unwrap_or(self.started_at)
    }

    fn from_row(row: EnrolmentRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse()?,
            client_id: row.client_id.parse()?,
            program_id: row.program_id.parse()?,
            status: EnrolmentStatus::parse(&row.status)?,
            started_at: time::from_db(&row.started_at)?,
            ended_at: row.ended_at.as_deref().map(time::from_db).transpose()?,
        })
    }
}

/// Core identity of a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientIdentity {
    pub id: ClientId,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl ClientIdentity {
    pub(crate) fn from_row(row: ClientIdentityRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse()?,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            date_of_birth: row
                .date_of_birth
                .as_deref()
                .map(time::date_from_db)
                .transpose()?,
            created_at: time::from_db(&row.created_at)?,
        })
    }
}

/// Input for [`create_client`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewClient {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

pub async fn create_client(pool: &SqlitePool, client: &NewClient) -> Result<ClientId> {
    if client.first_name.trim().is_empty() || client.last_name.trim().is_empty() {
        return Err(AccessError::InvalidInput(
            "client first and last name are required".to_string(),
        ));
    }

    let id = ClientId::generate();
    let now = time::to_db(&time::now());

    sqlx::query(
        r#"
        INSERT INTO clients (id, first_name, last_name, phone, date_of_birth, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(client.first_name.trim())
    .bind(client.last_name.trim())
    .bind(&client.phone)
    .bind(client.date_of_birth.as_ref().map(time::date_to_db))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    debug!("Created client {}", id);
    Ok(id)
}

pub async fn add_emergency_contact(
    pool: &SqlitePool,
    client: ClientId,
    name: &str,
    phone: Option<&str>,
    relationship: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO emergency_contacts (id, client_id, name, phone, relationship) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(client.to_string())
    .bind(name)
    .bind(phone)
    .bind(relationship)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn add_address(
    pool: &SqlitePool,
    client: ClientId,
    line1: &str,
    city: Option<&str>,
    postal_code: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO client_addresses (id, client_id, line1, city, postal_code) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(client.to_string())
    .bind(line1)
    .bind(city)
    .bind(postal_code)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn add_case_note(
    pool: &SqlitePool,
    client: ClientId,
    program: ProgramId,
    body: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO case_notes (id, client_id, program_id, body, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(client.to_string())
    .bind(program.to_string())
    .bind(body)
    .bind(time::to_db(&time::now()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert or replace one custom field value
pub async fn set_custom_field(
    pool: &SqlitePool,
    client: ClientId,
    field_name: &str,
    value: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO custom_field_values (id, client_id, field_name, value)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(client_id, field_name) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(client.to_string())
    .bind(field_name)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Enrol a client in a program starting now
pub async fn enrol(pool: &SqlitePool, client: ClientId, program: ProgramId) -> Result<EnrolmentId> {
    enrol_at(pool, client, program, time::now()).await
}

/// Enrol a client with an explicit start time
pub async fn enrol_at(
    pool: &SqlitePool,
    client: ClientId,
    program: ProgramId,
    started_at: DateTime<Utc>,
) -> Result<EnrolmentId> {
    let id = EnrolmentId::generate();

    sqlx::query(
        "INSERT INTO enrolments (id, client_id, program_id, status, started_at) VALUES (?, ?, ?, 'enrolled', ?)",
    )
    .bind(id.to_string())
    .bind(client.to_string())
    .bind(program.to_string())
    .bind(time::to_db(&started_at))
    .execute(pool)
    .await?;

    debug!("Enrolled client {} in program {}", client, program);
    Ok(id)
}

/// End an enrolment. Ending an already-ended enrolment changes nothing.
///
/// Returns whether this call ended it.
pub async fn end_enrolment(pool: &SqlitePool, enrolment: EnrolmentId) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE enrolments SET status = 'ended', ended_at = ? WHERE id = ? AND status = 'enrolled'",
    )
    .bind(time::to_db(&time::now()))
    .bind(enrolment.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn dedup_ids(ids: &[ClientId]) -> Vec<String> {
    ids.iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|id| id.to_string())
        .collect()
}

/// All enrolments (any status) for the given clients
pub async fn load_enrolments(pool: &SqlitePool, clients: &[ClientId]) -> Result<Vec<Enrolment>> {
    let ids = dedup_ids(clients);
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, client_id, program_id, status, started_at, ended_at FROM enrolments WHERE client_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(") ORDER BY client_id, started_at, id");

    let rows: Vec<EnrolmentRow> = builder.build_query_as().fetch_all(pool).await?;
    rows.into_iter().map(Enrolment::from_row).collect()
}

/// Core identity columns for the given clients, in id order
pub async fn load_identities(
    pool: &SqlitePool,
    clients: &[ClientId],
) -> Result<Vec<ClientIdentity>> {
    let ids = dedup_ids(clients);
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, first_name, last_name, phone, date_of_birth, created_at FROM clients WHERE id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(") ORDER BY id");

    let rows: Vec<ClientIdentityRow> = builder.build_query_as().fetch_all(pool).await?;
    rows.into_iter().map(ClientIdentity::from_row).collect()
}
