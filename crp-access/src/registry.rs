//! Program Registry
//!
//! Holds every program and its tier, and is the only place tier-sensitive
//! decisions read tiers from.
//!
//! # Snapshots
//!
//! Readers take an `Arc<TierSnapshot>`: an immutable copy of all program
//! tiers at one instant. A tier transition holds the write lock from before
//! its database update until the new snapshot is published, so no reader
//! can observe a program mid-transition and no reader sees a stale tier
//! after `set_tier` returns.
//!
//! # Tier rules
//!
//! - New programs are Standard.
//! - Standard → Confidential: allowed, with the operator who confirmed it.
//! - Confidential → Standard: only with a [`ComplianceOverride`], which is
//!   recorded in `tier_transitions` separately from the program row.
//! - Setting the tier a program already has is a no-op.

use chrono::{DateTime, Utc};
use crp_common::{time, ProgramId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{AccessError, Result};
use crate::principal::Principal;

/// Program classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Discoverable for deduplication, agency-wide visibility
    Standard,
    /// Fully isolated to the program's own staff
    Confidential,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Confidential => "confidential",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(Tier::Standard),
            "confidential" => Ok(Tier::Confidential),
            other => Err(AccessError::InvalidInput(format!("Unknown tier '{}'", other))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Program record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
}

/// Out-of-band approval for Confidential → Standard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceOverride {
    /// Reference to the compliance record (ticket, signed form)
    pub reference: String,
    pub authorized_by: UserId,
}

/// Result of a tier change request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierChange {
    Changed { from: Tier, to: Tier },
    Unchanged { tier: Tier },
}

/// A program id proven Standard-tier when the universe was built
///
/// Cannot be constructed or deserialized outside this module, so any API
/// taking one is structurally limited to Standard programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StandardProgramId(ProgramId);

impl StandardProgramId {
    pub fn program_id(&self) -> ProgramId {
        self.0
    }
}

/// Every Standard-tier program at one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardUniverse {
    programs: BTreeSet<StandardProgramId>,
}

impl StandardUniverse {
    /// Membership test that yields the typed id
    pub fn get(&self, program: &ProgramId) -> Option<StandardProgramId> {
        let candidate = StandardProgramId(*program);
        self.programs.get(&candidate).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StandardProgramId> {
        self.programs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }
}

/// Programs a principal may see clients through
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessiblePrograms {
    standard: BTreeSet<ProgramId>,
    confidential: BTreeSet<ProgramId>,
}

impl AccessiblePrograms {
    pub fn contains(&self, program: &ProgramId) -> bool {
        self.standard.contains(program) || self.confidential.contains(program)
    }

    pub fn standard(&self) -> &BTreeSet<ProgramId> {
        &self.standard
    }

    /// Confidential programs the principal is individually assigned to
    pub fn confidential(&self) -> &BTreeSet<ProgramId> {
        &self.confidential
    }

    pub fn all(&self) -> BTreeSet<ProgramId> {
        self.standard.union(&self.confidential).copied().collect()
    }
}

/// Immutable view of program tiers
#[derive(Debug, Clone, Default)]
pub struct TierSnapshot {
    programs: HashMap<ProgramId, Program>,
    version: u64,
}

impl TierSnapshot {
    pub(crate) fn from_programs(programs: Vec<Program>, version: u64) -> Self {
        Self {
            programs: programs.into_iter().map(|p| (p.id, p)).collect(),
            version,
        }
    }

    /// Monotonic counter, bumped on every published change
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn program(&self, id: &ProgramId) -> Option<&Program> {
        self.programs.get(id)
    }

    pub fn tier_of(&self, id: &ProgramId) -> Option<Tier> {
        self.programs.get(id).map(|p| p.tier)
    }

    /// Unknown programs count as Confidential
    pub fn is_confidential(&self, id: &ProgramId) -> bool {
        !matches!(self.tier_of(id), Some(Tier::Standard))
    }

    /// All programs sorted by name
    pub fn programs(&self) -> Vec<&Program> {
        let mut programs: Vec<&Program> = self.programs.values().collect();
        programs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        programs
    }

    /// All Standard programs, plus the Confidential programs the principal
    /// is individually assigned to. Two Confidential programs are only ever
    /// combined through two individual assignments.
    pub fn accessible_for(&self, principal: &Principal) -> AccessiblePrograms {
        let mut accessible = self.standard_access();
        accessible.confidential = principal
            .assignments
            .iter()
            .filter(|id| self.tier_of(id) == Some(Tier::Confidential))
            .copied()
            .collect();
        accessible
    }

    /// What any principal without a Confidential assignment may see
    pub fn standard_access(&self) -> AccessiblePrograms {
        AccessiblePrograms {
            standard: self
                .programs
                .values()
                .filter(|p| p.tier == Tier::Standard)
                .map(|p| p.id)
                .collect(),
            confidential: BTreeSet::new(),
        }
    }

    pub fn standard_universe(&self) -> StandardUniverse {
        StandardUniverse {
            programs: self
                .programs
                .values()
                .filter(|p| p.tier == Tier::Standard)
                .map(|p| StandardProgramId(p.id))
                .collect(),
        }
    }
}

/// Program Registry backed by the primary store
pub struct ProgramRegistry {
    pool: SqlitePool,
    snapshot: RwLock<Arc<TierSnapshot>>,
}

impl ProgramRegistry {
    /// Load all programs from the store
    pub async fn load(pool: SqlitePool) -> Result<Self> {
        let programs = fetch_programs(&pool).await?;
        info!("Program registry loaded {} programs", programs.len());
        Ok(Self {
            pool,
            snapshot: RwLock::new(Arc::new(TierSnapshot::from_programs(programs, 1))),
        })
    }

    /// Reload from the store, picking up programs created by other writers
    pub async fn refresh(&self) -> Result<()> {
        let mut guard = self.snapshot.write().await;
        let programs = fetch_programs(&self.pool).await?;
        let version = guard.version + 1;
        *guard = Arc::new(TierSnapshot::from_programs(programs, version));
        Ok(())
    }

    /// Current committed tiers
    pub async fn snapshot(&self) -> Arc<TierSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn list_programs(&self) -> Vec<Program> {
        self.snapshot()
            .await
            .programs()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn get_program(&self, id: ProgramId) -> Result<Program> {
        self.snapshot()
            .await
            .program(&id)
            .cloned()
            .ok_or(AccessError::ProgramNotFound(id))
    }

    /// `IsConfidential(programId)`
    pub async fn is_confidential(&self, id: ProgramId) -> Result<bool> {
        Ok(self.get_program(id).await?.tier == Tier::Confidential)
    }

    /// `ListAccessiblePrograms(principal)`
    pub async fn list_accessible_programs(
        &self,
        principal: &Principal,
    ) -> Result<AccessiblePrograms> {
        principal.validate()?;
        Ok(self.snapshot().await.accessible_for(principal))
    }

    pub async fn standard_universe(&self) -> StandardUniverse {
        self.snapshot().await.standard_universe()
    }

    /// Create a program; new programs are always Standard
    pub async fn create_program(&self, name: &str) -> Result<Program> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccessError::InvalidInput(
                "program name must not be empty".to_string(),
            ));
        }

        let mut guard = self.snapshot.write().await;

        let program = Program {
            id: ProgramId::generate(),
            name: name.to_string(),
            tier: Tier::Standard,
            created_at: time::now(),
        };
        let ts = time::to_db(&program.created_at);

        sqlx::query(
            "INSERT INTO programs (id, name, tier, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(program.id.to_string())
        .bind(&program.name)
        .bind(program.tier.as_str())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        let mut next = (**guard).clone();
        next.programs.insert(program.id, program.clone());
        next.version += 1;
        *guard = Arc::new(next);

        info!("Created program '{}' ({})", program.name, program.id);
        Ok(program)
    }

    /// `SetConfidential(programId)`
    pub async fn set_confidential(
        &self,
        id: ProgramId,
        confirmed_by: UserId,
    ) -> Result<TierChange> {
        self.set_tier(id, Tier::Confidential, confirmed_by, None).await
    }

    /// Confidential → Standard, which needs a compliance override
    pub async fn set_standard(
        &self,
        id: ProgramId,
        confirmed_by: UserId,
        compliance_override: Option<ComplianceOverride>,
    ) -> Result<TierChange> {
        self.set_tier(id, Tier::Standard, confirmed_by, compliance_override)
            .await
    }

    /// Apply a tier transition atomically with respect to all readers
    pub async fn set_tier(
        &self,
        id: ProgramId,
        target: Tier,
        confirmed_by: UserId,
        compliance_override: Option<ComplianceOverride>,
    ) -> Result<TierChange> {
        if confirmed_by.is_nil() {
            return Err(AccessError::InvalidInput(
                "tier change requires a confirming operator".to_string(),
            ));
        }
        if let Some(o) = &compliance_override {
            if o.reference.trim().is_empty() || o.authorized_by.is_nil() {
                return Err(AccessError::InvalidInput(
                    "compliance override needs a reference and an authorizing user".to_string(),
                ));
            }
        }

        // Held until the new snapshot is published
        let mut guard = self.snapshot.write().await;

        let mut tx = self.pool.begin().await?;

        let stored: Option<String> = sqlx::query_scalar("SELECT tier FROM programs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let current = match stored {
            Some(tier) => Tier::parse(&tier)?,
            None => return Err(AccessError::ProgramNotFound(id)),
        };

        if current == target {
            return Ok(TierChange::Unchanged { tier: current });
        }

        let recorded_override = match (current, target) {
            (Tier::Confidential, Tier::Standard) => match compliance_override {
                Some(o) => Some(o),
                None => {
                    warn!(
                        "Rejected Confidential -> Standard for program {} without override",
                        id
                    );
                    return Err(AccessError::InvalidTransition {
                        program: id,
                        from: current,
                        to: target,
                    });
                }
            },
            // An override has no meaning for Standard -> Confidential
            _ => None,
        };

        let now = time::to_db(&time::now());

        sqlx::query("UPDATE programs SET tier = ?, updated_at = ? WHERE id = ?")
            .bind(target.as_str())
            .bind(&now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO tier_transitions
                (id, program_id, from_tier, to_tier, confirmed_by,
                 override_reference, override_authorized_by, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(id.to_string())
        .bind(current.as_str())
        .bind(target.as_str())
        .bind(confirmed_by.to_string())
        .bind(recorded_override.as_ref().map(|o| o.reference.clone()))
        .bind(recorded_override.as_ref().map(|o| o.authorized_by.to_string()))
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // Publish before releasing the lock
        let mut next = (**guard).clone();
        match next.programs.get_mut(&id) {
            Some(program) => program.tier = target,
            None => {
                // Created by another writer since our last load
                let programs = fetch_programs(&self.pool).await?;
                next = TierSnapshot::from_programs(programs, next.version);
            }
        }
        next.version += 1;
        *guard = Arc::new(next);

        info!(
            "Program {} tier changed {} -> {} (confirmed by {})",
            id, current, target, confirmed_by
        );
        Ok(TierChange::Changed {
            from: current,
            to: target,
        })
    }

    /// Number of recorded transitions for a program
    pub async fn transition_count(&self, id: ProgramId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tier_transitions WHERE program_id = ?")
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

async fn fetch_programs(pool: &SqlitePool) -> Result<Vec<Program>> {
    let rows = sqlx::query_as::<_, crp_common::db::ProgramRow>(
        "SELECT id, name, tier, created_at, updated_at FROM programs",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(Program {
                id: row.id.parse()?,
                name: row.name,
                tier: Tier::parse(&row.tier)?,
                created_at: time::from_db(&row.created_at)?,
            })
        })
        .collect()
}
