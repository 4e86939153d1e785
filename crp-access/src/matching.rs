//! Matching Engine
//!
//! Advisory duplicate detection during intake. The search universe is what
//! the Visibility Filter returns for a principal holding no Confidential
//! assignment, so clients enrolled only in Confidential programs can never
//! be candidates and Confidential enrolments never influence ranking.
//!
//! Rules (fixed, not configurable):
//! - High: normalized phone equality (digits only)
//! - Low: first three characters of first name (case-insensitive) and
//!   exact date of birth, considered only when nothing matched by phone
//!
//! Only core identity columns of `clients` are read. Emergency contacts,
//! case notes, custom fields and addresses are never queried here.
//!
//! Any data error degrades to [`MatchStatus::Unavailable`] with no
//! candidates. The report never claims "no duplicate" when the check did
//! not run.

use chrono::{DateTime, NaiveDate, Utc};
use crp_common::{ClientId, ProgramId};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audit::{AccessAction, AccessAuditor};
use crate::error::{AccessError, Result};
use crate::filter::{VisibilityFilter, VisibleClientSet};
use crate::principal::Principal;
use crate::records::{self, ClientIdentity};

/// Number of first-name characters compared by the secondary rule
pub const NAME_PREFIX_LEN: usize = 3;

/// Digits only; `None` if nothing is left
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Lowercased first three characters of a first name
pub fn name_prefix(first_name: &str) -> Option<String> {
    let trimmed = first_name.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        trimmed
            .chars()
            .take(NAME_PREFIX_LEN)
            .flat_map(char::to_lowercase)
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    Phone,
    NamePrefixAndDateOfBirth,
}

/// A possible duplicate
///
/// Only the id, matched field and confidence are serialized. The remaining
/// fields feed ranking and merge evaluation and stay in-process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchCandidate {
    client_id: ClientId,
    matched_field: MatchedField,
    confidence: Confidence,
    #[serde(skip)]
    last_activity: Option<DateTime<Utc>>,
    #[serde(skip)]
    created_at: DateTime<Utc>,
    /// Active Standard programs
    #[serde(skip)]
    programs: Vec<ProgramId>,
    #[serde(skip)]
    audit_required: bool,
}

impl MatchCandidate {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn matched_field(&self) -> MatchedField {
        self.matched_field
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn programs(&self) -> &[ProgramId] {
        &self.programs
    }

    pub(crate) fn requires_audit(&self) -> bool {
        self.audit_required
    }
}

/// Attributes of a new or edited record
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchQuery {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    /// The record being edited, never reported as its own duplicate
    #[serde(default)]
    pub exclude_client: Option<ClientId>,
}

impl MatchQuery {
    fn phone_key(&self) -> Option<String> {
        self.phone.as_deref().and_then(normalize_phone)
    }

    fn name_key(&self) -> Option<(String, NaiveDate)> {
        let prefix = self.first_name.as_deref().and_then(name_prefix)?;
        Some((prefix, self.date_of_birth?))
    }

    fn is_searchable(&self) -> bool {
        self.phone_key().is_some() || self.name_key().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// The check ran; an empty list means nothing matched
    Complete,
    /// The check could not run; the empty list means nothing
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub status: MatchStatus,
    pub candidates: Vec<MatchCandidate>,
}

impl MatchReport {
    pub fn complete(candidates: Vec<MatchCandidate>) -> Self {
        Self {
            status: MatchStatus::Complete,
            candidates,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: MatchStatus::Unavailable,
            candidates: Vec::new(),
        }
    }
}

/// An existing Standard-visible record whose duplicates are being sought
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSubject {
    client_id: ClientId,
    created_at: DateTime<Utc>,
    programs: Vec<ProgramId>,
}

impl MatchSubject {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn programs(&self) -> &[ProgramId] {
        &self.programs
    }
}

fn active_programs(visible: &VisibleClientSet, client: &ClientId) -> Vec<ProgramId> {
    let mut programs: Vec<ProgramId> = visible
        .get(client)
        .map(|c| {
            c.enrolments
                .iter()
                .filter(|e| e.is_active())
                .map(|e| e.program_id)
                .collect()
        })
        .unwrap_or_default();
    programs.sort();
    programs.dedup();
    programs
}

/// Apply the matching rules to Standard-visible identities
///
/// Secondary matches are considered only when no primary match exists.
/// Ranked High before Low, then most recent enrolment activity, then id.
pub fn rank_candidates(
    query: &MatchQuery,
    identities: &[ClientIdentity],
    visible: &VisibleClientSet,
    limit: usize,
) -> Vec<MatchCandidate> {
    let eligible = identities
        .iter()
        .filter(|c| Some(c.id) != query.exclude_client && visible.contains(&c.id));

    let candidate = |identity: &ClientIdentity, field, confidence| {
        let client = visible.get(&identity.id);
        MatchCandidate {
            client_id: identity.id,
            matched_field: field,
            confidence,
            last_activity: client.and_then(|c| c.last_activity()),
            created_at: identity.created_at,
            programs: active_programs(visible, &identity.id),
            audit_required: client.is_some_and(|c| c.requires_audit()),
        }
    };

    let mut candidates: Vec<MatchCandidate> = match query.phone_key() {
        Some(phone) => eligible
            .clone()
            .filter(|c| {
                c.phone.as_deref().and_then(normalize_phone).as_deref() == Some(phone.as_str())
            })
            .map(|c| candidate(c, MatchedField::Phone, Confidence::High))
            .collect(),
        None => Vec::new(),
    };

    if candidates.is_empty() {
        if let Some((prefix, dob)) = query.name_key() {
            candidates = eligible
                .filter(|c| {
                    c.date_of_birth == Some(dob)
                        && name_prefix(&c.first_name).as_deref() == Some(prefix.as_str())
                })
                .map(|c| {
                    candidate(
                        c,
                        MatchedField::NamePrefixAndDateOfBirth,
                        Confidence::Low,
                    )
                })
                .collect();
        }
    }

    candidates.sort_by(rank_order);
    candidates.truncate(limit);
    candidates
}

fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then_with(|| b.last_activity.cmp(&a.last_activity))
        .then_with(|| a.client_id.cmp(&b.client_id))
}

pub struct MatchingEngine {
    pool: SqlitePool,
    filter: Arc<VisibilityFilter>,
    auditor: Arc<AccessAuditor>,
    limit: usize,
}

impl MatchingEngine {
    pub fn new(
        pool: SqlitePool,
        filter: Arc<VisibilityFilter>,
        auditor: Arc<AccessAuditor>,
        limit: usize,
    ) -> Self {
        Self {
            pool,
            filter,
            auditor,
            limit,
        }
    }

    /// Ranked duplicate candidates for an intake record
    ///
    /// Errors only for a malformed principal or a query with nothing to
    /// match on. Every other failure yields an `Unavailable` report.
    pub async fn find_candidates(
        &self,
        principal: &Principal,
        query: &MatchQuery,
    ) -> Result<MatchReport> {
        principal.validate()?;
        if !query.is_searchable() {
            return Err(AccessError::InvalidInput(
                "match query needs a phone number, or a first name and date of birth".to_string(),
            ));
        }

        let candidates = match self
            .search(query)
            .await
            .map_err(|e| AccessError::MatchingUnavailable(e.to_string()))
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("{}", e);
                return Ok(MatchReport::unavailable());
            }
        };

        let audited: Vec<ClientId> = candidates
            .iter()
            .filter(|c| c.audit_required)
            .map(|c| c.client_id)
            .collect();
        if let Err(e) = self
            .auditor
            .record_accesses(principal, &audited, AccessAction::Match)
            .await
        {
            warn!("Duplicate check unavailable: {}", e);
            return Ok(MatchReport::unavailable());
        }

        debug!("Duplicate check produced {} candidates", candidates.len());
        Ok(MatchReport::complete(candidates))
    }

    /// Candidates for an existing record, using its own core identity
    ///
    /// `None` when the record is not visible to a Standard search, which
    /// also covers a record that does not exist.
    pub async fn find_for_client(
        &self,
        principal: &Principal,
        client: ClientId,
    ) -> Result<Option<(MatchSubject, MatchReport)>> {
        principal.validate()?;

        let snapshot = self.filter.registry().snapshot().await;
        let standard = snapshot.standard_access();
        let visible = self.filter.filter_with(&snapshot, &standard, &[client]).await?;
        let Some(target) = visible.get(&client) else {
            return Ok(None);
        };
        if target.requires_audit() {
            self.auditor
                .record_access(principal, client, AccessAction::Merge)
                .await?;
        }

        let Some(identity) = records::load_identities(&self.pool, &[client])
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let subject = MatchSubject {
            client_id: client,
            created_at: identity.created_at,
            programs: active_programs(&visible, &client),
        };
        let query = MatchQuery {
            phone: identity.phone,
            first_name: Some(identity.first_name),
            date_of_birth: identity.date_of_birth,
            exclude_client: Some(client),
        };

        if !query.is_searchable() {
            return Ok(Some((subject, MatchReport::complete(Vec::new()))));
        }
        let report = self.find_candidates(principal, &query).await?;
        Ok(Some((subject, report)))
    }

    async fn search(&self, query: &MatchQuery) -> Result<Vec<MatchCandidate>> {
        let mut ids = Vec::new();

        if let Some(phone) = query.phone_key() {
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT id, phone FROM clients WHERE phone IS NOT NULL")
                    .fetch_all(&self.pool)
                    .await?;
            for (id, stored) in rows {
                if normalize_phone(&stored).as_deref() == Some(phone.as_str()) {
                    ids.push(id.parse::<ClientId>()?);
                }
            }
        }

        if let Some((_, dob)) = query.name_key() {
            let rows: Vec<String> =
                sqlx::query_scalar("SELECT id FROM clients WHERE date_of_birth = ?")
                    .bind(crp_common::time::date_to_db(&dob))
                    .fetch_all(&self.pool)
                    .await?;
            for id in rows {
                ids.push(id.parse::<ClientId>()?);
            }
        }

        if let Some(excluded) = query.exclude_client {
            ids.retain(|id| *id != excluded);
        }

        let snapshot = self.filter.registry().snapshot().await;
        let standard = snapshot.standard_access();
        let visible = self.filter.filter_with(&snapshot, &standard, &ids).await?;
        if visible.is_empty() {
            return Ok(Vec::new());
        }

        let identities = records::load_identities(&self.pool, &visible.ids()).await?;
        Ok(rank_candidates(query, &identities, &visible, self.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("555-0142").as_deref(), Some("5550142"));
        assert_eq!(normalize_phone("(555) 014-2").as_deref(), Some("5550142"));
        assert_eq!(normalize_phone("+1 555.0142").as_deref(), Some("15550142"));
        assert_eq!(normalize_phone("n/a"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_name_prefix() {
        assert_eq!(name_prefix("Jordan").as_deref(), Some("jor"));
        assert_eq!(name_prefix("JORDANA").as_deref(), Some("jor"));
        assert_eq!(name_prefix("  Al ").as_deref(), Some("al"));
        assert_eq!(name_prefix("   "), None);
    }

    #[test]
    fn test_query_needs_a_key() {
        let empty = MatchQuery::default();
        assert!(!empty.is_searchable());

        let name_only = MatchQuery {
            first_name: Some("Jordan".to_string()),
            ..Default::default()
        };
        assert!(!name_only.is_searchable());

        let name_and_dob = MatchQuery {
            first_name: Some("Jordan".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1),
            ..Default::default()
        };
        assert!(name_and_dob.is_searchable());
    }

    #[test]
    fn test_serialized_candidate_has_no_extra_fields() {
        let candidate = MatchCandidate {
            client_id: ClientId::generate(),
            matched_field: MatchedField::Phone,
            confidence: Confidence::High,
            last_activity: None,
            created_at: Utc::now(),
            programs: vec![ProgramId::generate()],
            audit_required: true,
        };
        let value = serde_json::to_value(&candidate).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(value["matched_field"], "phone");
        assert_eq!(value["confidence"], "high");
    }

    fn ranked(confidence: Confidence, days_ago: Option<i64>) -> MatchCandidate {
        MatchCandidate {
            client_id: ClientId::generate(),
            matched_field: MatchedField::Phone,
            confidence,
            last_activity: days_ago.map(|d| Utc::now() - chrono::Duration::days(d)),
            created_at: Utc::now(),
            programs: vec![],
            audit_required: false,
        }
    }

    #[test]
    fn test_rank_order_prefers_confidence_then_recent_activity() {
        let stale = ranked(Confidence::High, Some(30));
        let fresh = ranked(Confidence::High, Some(1));
        let unknown = ranked(Confidence::High, None);
        let low_fresh = ranked(Confidence::Low, Some(0));

        let mut candidates = vec![
            low_fresh.clone(),
            unknown.clone(),
            stale.clone(),
            fresh.clone(),
        ];
        candidates.sort_by(rank_order);

        let order: Vec<ClientId> = candidates.iter().map(|c| c.client_id).collect();
        assert_eq!(
            order,
            vec![
                fresh.client_id,
                stale.client_id,
                unknown.client_id,
                low_fresh.client_id
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_normalized_phone_is_digits(raw in ".{0,24}") {
            if let Some(digits) = normalize_phone(&raw) {
                prop_assert!(!digits.is_empty());
                prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
            }
        }

        #[test]
        fn prop_formatting_does_not_change_match_key(digits in "[0-9]{7,11}") {
            let formatted: String = digits
                .chars()
                .enumerate()
                .flat_map(|(i, c)| if i % 3 == 2 { vec![c, '-'] } else { vec![c] })
                .collect();
            prop_assert_eq!(normalize_phone(&formatted), normalize_phone(&digits));
            prop_assert_eq!(normalize_phone(&format!("({})", digits)), Some(digits.clone()));
        }
    }
}
