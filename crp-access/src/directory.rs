//! Client Directory
//!
//! Staff-facing read and write paths over client records. Each path follows
//! the same sequence:
//!
//! 1. Collect candidate ids (no client columns read yet)
//! 2. [`VisibilityFilter::filter_clients`]
//! 3. Load core identity for the permitted ids only
//! 4. Record an access event for every confidential-bearing client
//! 5. Return views built from visible enrolments only
//!
//! A hidden client and a missing client look the same: absent from a list,
//! `None` from [`ClientDirectory::detail`], `false` from
//! [`ClientDirectory::update_phone`].

use chrono::{DateTime, NaiveDate, Utc};
use crp_common::{time, ClientId, ProgramId};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use crate::audit::{AccessAction, AccessAuditor};
use crate::error::{AccessError, Result};
use crate::filter::{VisibilityFilter, VisibleClientSet};
use crate::principal::Principal;
use crate::records::{self, EnrolmentStatus};
use crate::registry::TierSnapshot;

/// Enrolment as shown to a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrolmentView {
    pub program_id: ProgramId,
    pub program_name: String,
    pub status: EnrolmentStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Client as shown to a principal: core identity plus visible enrolments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientView {
    pub id: ClientId,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub enrolments: Vec<EnrolmentView>,
}

pub struct ClientDirectory {
    pool: SqlitePool,
    filter: Arc<VisibilityFilter>,
    auditor: Arc<AccessAuditor>,
}

impl ClientDirectory {
    pub fn new(
        pool: SqlitePool,
        filter: Arc<VisibilityFilter>,
        auditor: Arc<AccessAuditor>,
    ) -> Self {
        Self {
            pool,
            filter,
            auditor,
        }
    }

    /// Clients actively enrolled in `program` that the principal may see
    ///
    /// An inaccessible program and an unknown program both list nobody.
    pub async fn list_program(
        &self,
        principal: &Principal,
        program: ProgramId,
    ) -> Result<Vec<ClientView>> {
        let candidates = self.enrolled_in(program).await?;
        self.resolve_scoped(principal, &candidates, AccessAction::List, Some(program))
            .await
    }

    /// Case-insensitive substring match on first or last name
    pub async fn search_by_name(
        &self,
        principal: &Principal,
        query: &str,
    ) -> Result<Vec<ClientView>> {
        let candidates = self.name_matches(query).await?;
        self.resolve(principal, &candidates, AccessAction::Search)
            .await
    }

    /// One client, or `None` when hidden or missing
    pub async fn detail(
        &self,
        principal: &Principal,
        client: ClientId,
    ) -> Result<Option<ClientView>> {
        let mut views = self
            .resolve(principal, &[client], AccessAction::Detail)
            .await?;
        Ok(views.pop())
    }

    /// Views for the requested ids that are visible; the rest are dropped
    pub async fn export(
        &self,
        principal: &Principal,
        clients: &[ClientId],
    ) -> Result<Vec<ClientView>> {
        self.resolve(principal, clients, AccessAction::Export).await
    }

    /// Opaque ids of the requested clients that are visible
    ///
    /// No client columns are read, but handing out a confidential-bearing
    /// id is still recorded.
    pub async fn visible_ids(
        &self,
        principal: &Principal,
        candidates: &[ClientId],
    ) -> Result<Vec<ClientId>> {
        let visible = self.filter.filter_clients(principal, candidates).await?;
        self.auditor
            .record_accesses(principal, &visible.audit_required(), AccessAction::Lookup)
            .await?;
        Ok(visible.ids())
    }

    /// Every client with an active enrolment that the principal may see
    pub async fn all_visible(
        &self,
        principal: &Principal,
        action: AccessAction,
    ) -> Result<Vec<ClientView>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT client_id FROM enrolments WHERE status = 'enrolled'",
        )
        .fetch_all(&self.pool)
        .await?;
        let candidates = parse_ids(ids)?;
        self.resolve(principal, &candidates, action).await
    }

    /// Change a visible client's phone number
    ///
    /// Returns `false`, with nothing written, when the client is hidden or
    /// missing. For confidential-bearing clients the audit append happens
    /// before commit; if it fails the update is rolled back. If the commit
    /// itself fails an `Aborted` event follows the `Granted` one.
    pub async fn update_phone(
        &self,
        principal: &Principal,
        client: ClientId,
        phone: Option<&str>,
    ) -> Result<bool> {
        let visible = self.filter.filter_clients(principal, &[client]).await?;
        let Some(target) = visible.get(&client) else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE clients SET phone = ?, updated_at = ? WHERE id = ?")
            .bind(phone)
            .bind(time::to_db(&time::now()))
            .bind(client.to_string())
            .execute(&mut *tx)
            .await?;

        if target.requires_audit() {
            // Dropping tx on error rolls the update back
            self.auditor
                .record_access(principal, client, AccessAction::Update)
                .await?;
        }

        if let Err(e) = tx.commit().await {
            if target.requires_audit() {
                self.auditor
                    .record_aborted(principal, client, AccessAction::Update)
                    .await;
            }
            return Err(e.into());
        }
        debug!("Updated phone for client {}", client);
        Ok(true)
    }

    pub(crate) async fn name_matches(&self, query: &str) -> Result<Vec<ClientId>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AccessError::InvalidInput(
                "search text must not be empty".to_string(),
            ));
        }

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM clients
            WHERE instr(lower(first_name), lower(?1)) > 0
               OR instr(lower(last_name), lower(?1)) > 0
            "#,
        )
        .bind(query)
        .fetch_all(&self.pool)
        .await?;
        parse_ids(ids)
    }

    pub(crate) async fn enrolled_in(&self, program: ProgramId) -> Result<Vec<ClientId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT client_id FROM enrolments WHERE program_id = ? AND status = 'enrolled'",
        )
        .bind(program.to_string())
        .fetch_all(&self.pool)
        .await?;
        parse_ids(ids)
    }

    /// Filter, load, audit, project
    pub(crate) async fn resolve(
        &self,
        principal: &Principal,
        candidates: &[ClientId],
        action: AccessAction,
    ) -> Result<Vec<ClientView>> {
        self.resolve_scoped(principal, candidates, action, None)
            .await
    }

    /// As [`Self::resolve`], keeping only clients visibly and actively
    /// enrolled in `scope` when given
    pub(crate) async fn resolve_scoped(
        &self,
        principal: &Principal,
        candidates: &[ClientId],
        action: AccessAction,
        scope: Option<ProgramId>,
    ) -> Result<Vec<ClientView>> {
        let mut visible = self.filter.filter_clients(principal, candidates).await?;
        if let Some(program) = scope {
            visible.retain(|c| c.is_enrolled_in(&program));
        }
        if visible.is_empty() {
            return Ok(Vec::new());
        }

        let identities = records::load_identities(&self.pool, &visible.ids()).await?;

        self.auditor
            .record_accesses(principal, &visible.audit_required(), action)
            .await?;

        let snapshot = self.filter.registry().snapshot().await;
        Ok(build_views(&snapshot, &visible, identities))
    }
}

fn parse_ids(ids: Vec<String>) -> Result<Vec<ClientId>> {
    ids.iter().map(|id| Ok(id.parse::<ClientId>()?)).collect()
}

fn build_views(
    snapshot: &TierSnapshot,
    visible: &VisibleClientSet,
    identities: Vec<records::ClientIdentity>,
) -> Vec<ClientView> {
    let mut views: Vec<ClientView> = identities
        .into_iter()
        .filter_map(|identity| {
            let client = visible.get(&identity.id)?;
            let enrolments = client
                .enrolments
                .iter()
                .map(|e| EnrolmentView {
                    program_id: e.program_id,
                    program_name: snapshot
                        .program(&e.program_id)
                        .map(|p| p.name.clone())
                        .unwrap_or_default(),
                    status: e.status,
                    started_at: e.started_at,
                    ended_at: e.ended_at,
                })
                .collect();
            Some(ClientView {
                id: identity.id,
                first_name: identity.first_name,
                last_name: identity.last_name,
                phone: identity.phone,
                date_of_birth: identity.date_of_birth,
                enrolments,
            })
        })
        .collect();

    views.sort_by(|a, b| {
        a.last_name
            .cmp(&b.last_name)
            .then_with(|| a.first_name.cmp(&b.first_name))
            .then_with(|| a.id.cmp(&b.id))
    });
    views
}
