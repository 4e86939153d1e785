//! Access Auditor
//!
//! Every filter-gated read or write that resolves to a client carrying a
//! Confidential enrolment is recorded here before the result is handed
//! back. The call is an explicit post-filter hook made by each read path,
//! so tests can substitute an [`AuditSink`] and assert what was recorded.
//!
//! Failure handling: if the append fails, the confidential operation fails
//! with [`AccessError::AuditWriteFailed`]. Standard-only access never calls
//! into the auditor.

mod store;

pub use store::{ChainStatus, SqliteAuditStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crp_common::{time, ClientId, ProgramId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{AccessError, Result};
use crate::filter::VisibilityFilter;
use crate::principal::{ActiveRole, Principal};

/// What the principal did with the client record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    List,
    Lookup,
    Search,
    Detail,
    Export,
    Update,
    Match,
    Merge,
    HistoryQuery,
    AdminList,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::List => "list",
            AccessAction::Lookup => "lookup",
            AccessAction::Search => "search",
            AccessAction::Detail => "detail",
            AccessAction::Export => "export",
            AccessAction::Update => "update",
            AccessAction::Match => "match",
            AccessAction::Merge => "merge",
            AccessAction::HistoryQuery => "history_query",
            AccessAction::AdminList => "admin_list",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let action = match s {
            "list" => AccessAction::List,
            "lookup" => AccessAction::Lookup,
            "search" => AccessAction::Search,
            "detail" => AccessAction::Detail,
            "export" => AccessAction::Export,
            "update" => AccessAction::Update,
            "match" => AccessAction::Match,
            "merge" => AccessAction::Merge,
            "history_query" => AccessAction::HistoryQuery,
            "admin_list" => AccessAction::AdminList,
            other => {
                return Err(AccessError::InvalidInput(format!(
                    "Unknown access action '{}'",
                    other
                )))
            }
        };
        Ok(action)
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOutcome {
    Granted,
    Denied,
    /// A granted write whose transaction then failed to commit
    Aborted,
}

impl AccessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOutcome::Granted => "granted",
            AccessOutcome::Denied => "denied",
            AccessOutcome::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "granted" => Ok(AccessOutcome::Granted),
            "denied" => Ok(AccessOutcome::Denied),
            "aborted" => Ok(AccessOutcome::Aborted),
            other => Err(AccessError::InvalidInput(format!(
                "Unknown access outcome '{}'",
                other
            ))),
        }
    }
}

/// Immutable access record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessEvent {
    pub event_id: Uuid,
    pub principal_id: UserId,
    pub active_role: ActiveRole,
    pub occurred_at: DateTime<Utc>,
    pub client_id: ClientId,
    pub action: AccessAction,
    pub outcome: AccessOutcome,
}

impl AccessEvent {
    pub fn new(
        principal: &Principal,
        client_id: ClientId,
        action: AccessAction,
        outcome: AccessOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            principal_id: principal.user_id,
            active_role: principal.active_role,
            occurred_at: time::now(),
            client_id,
            action,
            outcome,
        }
    }
}

/// Explicit change of active role selection
///
/// Carries the program sets on both sides: a switch between two Staff
/// selections changes nothing but the programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSwitchEvent {
    pub event_id: Uuid,
    pub user_id: UserId,
    pub from_role: ActiveRole,
    pub from_programs: Vec<ProgramId>,
    pub to_role: ActiveRole,
    pub to_programs: Vec<ProgramId>,
    pub occurred_at: DateTime<Utc>,
}

impl RoleSwitchEvent {
    pub fn between(from: &Principal, to: &Principal) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id: to.user_id,
            from_role: from.active_role,
            from_programs: from.assignments.clone(),
            to_role: to.active_role,
            to_programs: to.assignments.clone(),
            occurred_at: time::now(),
        }
    }
}

/// Append-only destination for audit records
///
/// Implementations must not offer update or delete.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AccessEvent) -> Result<()>;

    async fn append_role_switch(&self, event: &RoleSwitchEvent) -> Result<()>;

    /// Events for one client, oldest first
    async fn history(&self, client: ClientId) -> Result<Vec<AccessEvent>>;
}

/// Records access to confidential-bearing clients and answers the one
/// scoped history query
pub struct AccessAuditor {
    sink: Arc<dyn AuditSink>,
    filter: Arc<VisibilityFilter>,
}

impl AccessAuditor {
    pub fn new(sink: Arc<dyn AuditSink>, filter: Arc<VisibilityFilter>) -> Self {
        Self { sink, filter }
    }

    /// `RecordAccess(principal, clientId, action)`
    pub async fn record_access(
        &self,
        principal: &Principal,
        client: ClientId,
        action: AccessAction,
    ) -> Result<()> {
        let event = AccessEvent::new(principal, client, action, AccessOutcome::Granted);
        self.append(&event).await
    }

    /// Follow a granted write that never committed
    ///
    /// Best effort: the write already failed and that error is what the
    /// caller sees.
    pub async fn record_aborted(
        &self,
        principal: &Principal,
        client: ClientId,
        action: AccessAction,
    ) {
        let event = AccessEvent::new(principal, client, action, AccessOutcome::Aborted);
        if let Err(e) = self.sink.append(&event).await {
            warn!(
                "Could not record aborted {} of client {}: {}",
                action, client, e
            );
        }
    }

    /// Record one event per client, stopping at the first failure
    pub async fn record_accesses(
        &self,
        principal: &Principal,
        clients: &[ClientId],
        action: AccessAction,
    ) -> Result<()> {
        for client in clients {
            self.record_access(principal, *client, action).await?;
        }
        Ok(())
    }

    async fn append(&self, event: &AccessEvent) -> Result<()> {
        match self.sink.append(event).await {
            Ok(()) => {
                debug!(
                    "Audited {} of client {} by {}",
                    event.action, event.client_id, event.principal_id
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Audit append failed for {} by {}: {}",
                    event.action, event.principal_id, e
                );
                Err(AccessError::AuditWriteFailed(e.to_string()))
            }
        }
    }

    pub async fn record_role_switch(&self, from: &Principal, to: &Principal) -> Result<()> {
        let event = RoleSwitchEvent::between(from, to);
        self.sink.append_role_switch(&event).await.map_err(|e| {
            error!("Role switch audit failed for {}: {}", event.user_id, e);
            AccessError::AuditWriteFailed(e.to_string())
        })
    }

    /// `QueryAccessHistory(clientId)`
    ///
    /// `Some` only for a principal directly assigned to a Confidential
    /// program the client is enrolled in. Everyone else, and every unknown
    /// client id, gets `None`.
    pub async fn query_access_history(
        &self,
        principal: &Principal,
        client: ClientId,
    ) -> Result<Option<Vec<AccessEvent>>> {
        principal.validate()?;

        let snapshot = self.filter.registry().snapshot().await;
        let accessible = snapshot.accessible_for(principal);
        let visible = self
            .filter
            .filter_with(&snapshot, &accessible, &[client])
            .await?;

        let permitted = visible.get(&client).is_some_and(|c| {
            c.enrolments.iter().any(|e| {
                snapshot.is_confidential(&e.program_id) && principal.is_assigned(&e.program_id)
            })
        });

        if !permitted {
            let denied = AccessEvent::new(
                principal,
                client,
                AccessAction::HistoryQuery,
                AccessOutcome::Denied,
            );
            if let Err(e) = self.sink.append(&denied).await {
                warn!("Could not record denied history query: {}", e);
            }
            return Ok(None);
        }

        self.record_access(principal, client, AccessAction::HistoryQuery)
            .await?;
        let events = self.sink.history(client).await?;
        Ok(Some(events))
    }
}
