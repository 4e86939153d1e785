//! Admin View Adapter
//!
//! Administrative listings go through the same Visibility Filter as staff
//! views, parameterized by the administrator's own assignments. There is no
//! override: an administrator without a Confidential assignment sees no
//! client through that program.
//!
//! Headcounts of a Confidential program requested from outside it are
//! reported only at or above the suppression threshold.

use crp_common::db::settings;
use crp_common::ProgramId;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::audit::AccessAction;
use crate::directory::{ClientDirectory, ClientView};
use crate::error::Result;
use crate::principal::Principal;
use crate::registry::{Program, ProgramRegistry, Tier};

/// Which clients an administrative listing covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdminListing {
    All,
    Program { program: ProgramId },
    Search { query: String },
}

/// A headcount, or the fact that it is too small to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateCount {
    Exact { count: u64 },
    BelowThreshold { threshold: u32 },
}

impl AggregateCount {
    /// Small-cell suppression
    pub fn suppress(count: u64, threshold: u32) -> Self {
        if count >= u64::from(threshold) {
            AggregateCount::Exact { count }
        } else {
            AggregateCount::BelowThreshold { threshold }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramHeadcount {
    pub program_id: ProgramId,
    pub program_name: String,
    pub tier: Tier,
    pub count: AggregateCount,
}

pub struct AdminViewAdapter {
    pool: SqlitePool,
    registry: Arc<ProgramRegistry>,
    directory: Arc<ClientDirectory>,
}

impl AdminViewAdapter {
    pub fn new(
        pool: SqlitePool,
        registry: Arc<ProgramRegistry>,
        directory: Arc<ClientDirectory>,
    ) -> Self {
        Self {
            pool,
            registry,
            directory,
        }
    }

    /// Filtered administrative listing
    pub async fn list(
        &self,
        principal: &Principal,
        listing: &AdminListing,
    ) -> Result<Vec<ClientView>> {
        match listing {
            AdminListing::All => {
                self.directory
                    .all_visible(principal, AccessAction::AdminList)
                    .await
            }
            AdminListing::Program { program } => {
                let candidates = self.directory.enrolled_in(*program).await?;
                self.directory
                    .resolve_scoped(
                        principal,
                        &candidates,
                        AccessAction::AdminList,
                        Some(*program),
                    )
                    .await
            }
            AdminListing::Search { query } => {
                let candidates = self.directory.name_matches(query).await?;
                self.directory
                    .resolve(principal, &candidates, AccessAction::AdminList)
                    .await
            }
        }
    }

    /// Active headcount of one program
    pub async fn headcount(
        &self,
        principal: &Principal,
        program: ProgramId,
    ) -> Result<ProgramHeadcount> {
        principal.validate()?;
        let program = self.registry.get_program(program).await?;
        let threshold = settings::load_suppression_threshold(&self.pool).await?;
        self.count_program(principal, program, threshold).await
    }

    /// Headcounts for every program, suppression applied per program
    pub async fn program_report(&self, principal: &Principal) -> Result<Vec<ProgramHeadcount>> {
        principal.validate()?;
        let threshold = settings::load_suppression_threshold(&self.pool).await?;

        let mut report = Vec::new();
        for program in self.registry.list_programs().await {
            report.push(self.count_program(principal, program, threshold).await?);
        }
        Ok(report)
    }

    async fn count_program(
        &self,
        principal: &Principal,
        program: Program,
        threshold: u32,
    ) -> Result<ProgramHeadcount> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT client_id) FROM enrolments WHERE program_id = ? AND status = 'enrolled'",
        )
        .bind(program.id.to_string())
        .fetch_one(&self.pool)
        .await?;
        let count = u64::try_from(count).unwrap_or(0);

        let exact = program.tier == Tier::Standard || principal.is_assigned(&program.id);
        let count = if exact {
            AggregateCount::Exact { count }
        } else {
            AggregateCount::suppress(count, threshold)
        };

        Ok(ProgramHeadcount {
            program_id: program.id,
            program_name: program.name,
            tier: program.tier,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppress_below_threshold() {
        assert_eq!(
            AggregateCount::suppress(7, 10),
            AggregateCount::BelowThreshold { threshold: 10 }
        );
        assert_eq!(
            AggregateCount::suppress(0, 10),
            AggregateCount::BelowThreshold { threshold: 10 }
        );
    }

    #[test]
    fn test_suppress_at_and_above_threshold() {
        assert_eq!(
            AggregateCount::suppress(10, 10),
            AggregateCount::Exact { count: 10 }
        );
        assert_eq!(
            AggregateCount::suppress(42, 10),
            AggregateCount::Exact { count: 42 }
        );
    }

    #[test]
    fn test_below_threshold_serializes_without_count() {
        let json = serde_json::to_value(AggregateCount::BelowThreshold { threshold: 10 }).unwrap();
        assert_eq!(json["kind"], "below_threshold");
        assert_eq!(json["threshold"], 10);
        assert!(json.get("count").is_none());
    }

    #[test]
    fn test_listing_deserializes() {
        let listing: AdminListing = serde_json::from_str(r#"{"kind":"all"}"#).unwrap();
        assert_eq!(listing, AdminListing::All);
        let listing: AdminListing =
            serde_json::from_str(r#"{"kind":"search","query":"lee"}"#).unwrap();
        assert_eq!(
            listing,
            AdminListing::Search {
                query: "lee".to_string()
            }
        );
    }
}
