//! Visibility Filter
//!
//! The single decision point for which clients a principal may observe.
//! Every read path (list, search, detail, export, matching, admin, audit
//! history) resolves its candidate ids through [`VisibilityFilter`] before
//! touching any client column.
//!
//! # Rules
//!
//! Visibility is evaluated per enrolment against the principal's accessible
//! programs, never from a per-client sensitivity flag:
//!
//! 1. A client is visible iff at least one *active* enrolment is in an
//!    accessible program.
//! 2. The returned enrolments are only those in accessible programs.
//!    Enrolments in other Confidential programs are dropped without a
//!    placeholder.
//! 3. Programs missing from the tier snapshot are inaccessible.
//!
//! A client id that does not exist and a client id that is filtered out
//! both simply do not appear. Every requested id is evaluated the same way
//! with no early exit.

use crp_common::ClientId;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::Result;
use crate::principal::Principal;
use crate::records::{self, Enrolment};
use crate::registry::{AccessiblePrograms, ProgramRegistry, TierSnapshot};

/// A client the principal may observe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleClient {
    pub client_id: ClientId,
    /// Enrolments in accessible programs only
    pub enrolments: Vec<Enrolment>,
    /// Client has an enrolment (any status) in a Confidential program
    pub(crate) audit_required: bool,
}

impl VisibleClient {
    pub fn requires_audit(&self) -> bool {
        self.audit_required
    }

    pub fn is_enrolled_in(&self, program: &crp_common::ProgramId) -> bool {
        self.enrolments
            .iter()
            .any(|e| e.is_active() && &e.program_id == program)
    }

    /// Latest activity across the visible enrolments
    pub fn last_activity(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.enrolments.iter().map(Enrolment::last_activity).max()
    }
}

/// Permitted subset of a candidate set, keyed by client id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleClientSet {
    clients: BTreeMap<ClientId, VisibleClient>,
}

impl VisibleClientSet {
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn get(&self, id: &ClientId) -> Option<&VisibleClient> {
        self.clients.get(id)
    }

    /// Opaque ids, sorted
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisibleClient> {
        self.clients.values()
    }

    /// Clients whose access must be audited
    pub fn audit_required(&self) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|c| c.audit_required)
            .map(|c| c.client_id)
            .collect()
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&VisibleClient) -> bool) {
        self.clients.retain(|_, client| keep(client));
    }
}

/// Pure visibility evaluation over already-loaded state
///
/// `enrolments` may contain enrolments of clients not in `candidates`; they
/// are ignored. Same inputs always produce the same output.
pub fn evaluate_visibility(
    snapshot: &TierSnapshot,
    accessible: &AccessiblePrograms,
    candidates: &[ClientId],
    enrolments: &[Enrolment],
) -> VisibleClientSet {
    let mut by_client: HashMap<ClientId, Vec<&Enrolment>> = HashMap::new();
    for enrolment in enrolments {
        by_client.entry(enrolment.client_id).or_default().push(enrolment);
    }

    let mut clients = BTreeMap::new();
    for candidate in candidates {
        let all = by_client.get(candidate).map(Vec::as_slice).unwrap_or(&[]);

        let mut visible = Vec::new();
        let mut has_active_accessible = false;
        let mut audit_required = false;
        for enrolment in all {
            let accessible_here = accessible.contains(&enrolment.program_id);
            audit_required |= snapshot.is_confidential(&enrolment.program_id);
            if accessible_here {
                has_active_accessible |= enrolment.is_active();
                visible.push((*enrolment).clone());
            }
        }

        if has_active_accessible {
            clients.insert(
                *candidate,
                VisibleClient {
                    client_id: *candidate,
                    enrolments: visible,
                    audit_required,
                },
            );
        }
    }

    VisibleClientSet { clients }
}

/// Visibility Filter over the primary store
pub struct VisibilityFilter {
    pool: SqlitePool,
    registry: Arc<ProgramRegistry>,
}

impl VisibilityFilter {
    pub fn new(pool: SqlitePool, registry: Arc<ProgramRegistry>) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &Arc<ProgramRegistry> {
        &self.registry
    }

    /// `FilterClients(principal, candidateClientIds)`
    pub async fn filter_clients(
        &self,
        principal: &Principal,
        candidates: &[ClientId],
    ) -> Result<VisibleClientSet> {
        principal.validate()?;
        let snapshot = self.registry.snapshot().await;
        let accessible = snapshot.accessible_for(principal);
        self.filter_with(&snapshot, &accessible, candidates).await
    }

    /// Allowed client ids only
    pub async fn allowed_client_ids(
        &self,
        principal: &Principal,
        candidates: &[ClientId],
    ) -> Result<Vec<ClientId>> {
        Ok(self.filter_clients(principal, candidates).await?.ids())
    }

    /// Filter against an explicit accessible set taken from `snapshot`
    pub(crate) async fn filter_with(
        &self,
        snapshot: &TierSnapshot,
        accessible: &AccessiblePrograms,
        candidates: &[ClientId],
    ) -> Result<VisibleClientSet> {
        let enrolments = records::load_enrolments(&self.pool, candidates).await?;
        Ok(evaluate_visibility(
            snapshot,
            accessible,
            candidates,
            &enrolments,
        ))
    }
}
