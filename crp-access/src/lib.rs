//! # CRP Access Boundary (crp-access)
//!
//! Program tiering, client visibility and duplicate detection for a shared
//! multi-program client database.
//!
//! **Components:**
//! - [`registry`]: programs, tiers, one-way tier transitions
//! - [`filter`]: the Visibility Filter every read path goes through
//! - [`directory`]: list/search/detail/export/update composed on the filter
//! - [`matching`]: Standard-tier duplicate candidates
//! - [`merge`]: merge proposals over the Standard universe only
//! - [`admin`]: filtered admin listings and suppressed headcounts
//! - [`audit`]: access events in a separate, hash-chained store
//! - [`session`]: explicit, audited role switching
//! - [`api`]: HTTP adapter

pub mod admin;
pub mod api;
pub mod audit;
pub mod directory;
pub mod error;
pub mod filter;
pub mod matching;
pub mod merge;
pub mod principal;
pub mod records;
pub mod registry;
pub mod session;

pub use error::{AccessError, Result};
pub use principal::{ActiveRole, Principal};

use crp_common::db::settings;
use crp_common::ClientId;
use sqlx::SqlitePool;
use std::sync::Arc;

use admin::AdminViewAdapter;
use audit::{AccessAction, AccessAuditor, AuditSink};
use directory::ClientDirectory;
use filter::VisibilityFilter;
use matching::MatchingEngine;
use merge::{MergeCandidateEvaluator, MergeProposal};
use registry::ProgramRegistry;

/// All access-boundary components wired over one primary store and one
/// audit sink
pub struct AccessServices {
    pub registry: Arc<ProgramRegistry>,
    pub filter: Arc<VisibilityFilter>,
    pub auditor: Arc<AccessAuditor>,
    pub directory: Arc<ClientDirectory>,
    pub matching: Arc<MatchingEngine>,
    pub admin: Arc<AdminViewAdapter>,
    pool: SqlitePool,
}

impl AccessServices {
    pub async fn new(pool: SqlitePool, sink: Arc<dyn AuditSink>) -> Result<Self> {
        let registry = Arc::new(ProgramRegistry::load(pool.clone()).await?);
        let filter = Arc::new(VisibilityFilter::new(pool.clone(), Arc::clone(&registry)));
        let auditor = Arc::new(AccessAuditor::new(sink, Arc::clone(&filter)));
        let directory = Arc::new(ClientDirectory::new(
            pool.clone(),
            Arc::clone(&filter),
            Arc::clone(&auditor),
        ));

        let limit = settings::load_match_result_limit(&pool).await?;
        let matching = Arc::new(MatchingEngine::new(
            pool.clone(),
            Arc::clone(&filter),
            Arc::clone(&auditor),
            limit as usize,
        ));
        let admin = Arc::new(AdminViewAdapter::new(
            pool.clone(),
            Arc::clone(&registry),
            Arc::clone(&directory),
        ));

        Ok(Self {
            registry,
            filter,
            auditor,
            directory,
            matching,
            admin,
            pool,
        })
    }

    /// Primary store pool, for record workflows
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Merge proposals for an existing Standard-visible record
    ///
    /// `None` when the record is not in the Standard universe or does not
    /// exist.
    pub async fn merge_proposals(
        &self,
        principal: &Principal,
        client: ClientId,
    ) -> Result<Option<Vec<MergeProposal>>> {
        let Some((subject, report)) = self.matching.find_for_client(principal, client).await?
        else {
            return Ok(None);
        };

        let universe = self.registry.standard_universe().await;
        let proposals = MergeCandidateEvaluator::propose(&universe, &subject, &report);

        let audited: Vec<ClientId> = report
            .candidates
            .iter()
            .filter(|c| c.requires_audit())
            .map(|c| c.client_id())
            .filter(|id| {
                proposals
                    .iter()
                    .any(|p| p.survivor == *id || p.duplicate == *id)
            })
            .collect();
        self.auditor
            .record_accesses(principal, &audited, AccessAction::Merge)
            .await?;

        Ok(Some(proposals))
    }
}
