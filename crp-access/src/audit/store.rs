//! SQLite audit store
//!
//! Lives in its own database file behind its own pool. Access events form a
//! SHA-256 hash chain: each row stores the previous row's hash and its own
//! hash over (previous hash, event fields). Removing or editing a row breaks
//! the chain at that point.

use async_trait::async_trait;
use crp_common::db::AccessEventRow;
use crp_common::{time, ClientId, ProgramId, UserId};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use super::{AccessAction, AccessEvent, AccessOutcome, AuditSink, RoleSwitchEvent};
use crate::error::{AccessError, Result};
use crate::principal::ActiveRole;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Result of walking the access event chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Intact { events: u64 },
    /// First row whose hash or back-link does not match
    Broken { seq: i64 },
}

pub struct SqliteAuditStore {
    pool: SqlitePool,
    /// Serializes appends so each event links to its true predecessor
    append_lock: Mutex<()>,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            append_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Recompute every hash from the first event onward
    pub async fn verify_chain(&self) -> Result<ChainStatus> {
        let rows: Vec<AccessEventRow> = sqlx::query_as(
            r#"
            SELECT seq, event_id, principal_id, active_role, occurred_at, client_id,
                   action, outcome, prev_hash, event_hash
            FROM access_events
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut expected_prev = GENESIS_HASH.to_string();
        for row in &rows {
            if row.prev_hash != expected_prev || row.event_hash != hash_row(row) {
                return Ok(ChainStatus::Broken { seq: row.seq });
            }
            expected_prev = row.event_hash.clone();
        }

        Ok(ChainStatus::Intact {
            events: rows.len() as u64,
        })
    }

    pub async fn role_switch_count(&self, user: UserId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM role_switch_events WHERE user_id = ?")
                .bind(user.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Role switches for one user, oldest first
    pub async fn role_switches(&self, user: UserId) -> Result<Vec<RoleSwitchEvent>> {
        let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT event_id, from_role, from_programs, to_role, to_programs, occurred_at
            FROM role_switch_events
            WHERE user_id = ?
            ORDER BY seq
            "#,
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(event_id, from_role, from_programs, to_role, to_programs, occurred_at)| {
                    Ok(RoleSwitchEvent {
                        event_id: event_id.parse().map_err(|e| {
                            AccessError::InvalidInput(format!("Invalid event id: {}", e))
                        })?,
                        user_id: user,
                        from_role: parse_role(&from_role)?,
                        from_programs: programs_from_db(&from_programs)?,
                        to_role: parse_role(&to_role)?,
                        to_programs: programs_from_db(&to_programs)?,
                        occurred_at: time::from_db(&occurred_at)?,
                    })
                },
            )
            .collect()
    }
}

/// Hash over: previous hash, event id, principal, role, time, client,
/// action, outcome
fn compute_hash(parts: [&str; 8]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn hash_row(row: &AccessEventRow) -> String {
    compute_hash([
        &row.prev_hash,
        &row.event_id,
        &row.principal_id,
        &row.active_role,
        &row.occurred_at,
        &row.client_id,
        &row.action,
        &row.outcome,
    ])
}

fn parse_role(raw: &str) -> Result<ActiveRole> {
    ActiveRole::parse(raw).ok_or_else(|| AccessError::InvalidInput(format!("Unknown role '{}'", raw)))
}

/// Program sets are stored as JSON arrays of ids
fn programs_to_db(programs: &[ProgramId]) -> Result<String> {
    serde_json::to_string(programs)
        .map_err(|e| AccessError::InvalidInput(format!("Invalid program set: {}", e)))
}

fn programs_from_db(raw: &str) -> Result<Vec<ProgramId>> {
    serde_json::from_str(raw)
        .map_err(|e| AccessError::InvalidInput(format!("Invalid program set: {}", e)))
}

fn event_from_row(row: AccessEventRow) -> Result<AccessEvent> {
    Ok(AccessEvent {
        event_id: row
            .event_id
            .parse()
            .map_err(|e| AccessError::InvalidInput(format!("Invalid event id: {}", e)))?,
        principal_id: row.principal_id.parse()?,
        active_role: parse_role(&row.active_role)?,
        occurred_at: time::from_db(&row.occurred_at)?,
        client_id: row.client_id.parse()?,
        action: AccessAction::parse(&row.action)?,
        outcome: AccessOutcome::parse(&row.outcome)?,
    })
}

#[async_trait]
impl AuditSink for SqliteAuditStore {
    async fn append(&self, event: &AccessEvent) -> Result<()> {
        let _guard = self.append_lock.lock().await;

        let prev_hash: Option<String> =
            sqlx::query_scalar("SELECT event_hash FROM access_events ORDER BY seq DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        let prev_hash = prev_hash.unwrap_or_else(|| GENESIS_HASH.to_string());

        let event_id = event.event_id.to_string();
        let principal_id = event.principal_id.to_string();
        let occurred_at = time::to_db(&event.occurred_at);
        let client_id = event.client_id.to_string();
        let event_hash = compute_hash([
            &prev_hash,
            &event_id,
            &principal_id,
            event.active_role.as_str(),
            &occurred_at,
            &client_id,
            event.action.as_str(),
            event.outcome.as_str(),
        ]);

        sqlx::query(
            r#"
            INSERT INTO access_events
                (event_id, principal_id, active_role, occurred_at, client_id,
                 action, outcome, prev_hash, event_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event_id)
        .bind(&principal_id)
        .bind(event.active_role.as_str())
        .bind(&occurred_at)
        .bind(&client_id)
        .bind(event.action.as_str())
        .bind(event.outcome.as_str())
        .bind(&prev_hash)
        .bind(&event_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_role_switch(&self, event: &RoleSwitchEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_switch_events
                (event_id, user_id, from_role, from_programs, to_role, to_programs, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id.to_string())
        .bind(event.user_id.to_string())
        .bind(event.from_role.as_str())
        .bind(programs_to_db(&event.from_programs)?)
        .bind(event.to_role.as_str())
        .bind(programs_to_db(&event.to_programs)?)
        .bind(time::to_db(&event.occurred_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, client: ClientId) -> Result<Vec<AccessEvent>> {
        let rows: Vec<AccessEventRow> = sqlx::query_as(
            r#"
            SELECT seq, event_id, principal_id, active_role, occurred_at, client_id,
                   action, outcome, prev_hash, event_hash
            FROM access_events
            WHERE client_id = ?
            ORDER BY seq
            "#,
        )
        .bind(client.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}
