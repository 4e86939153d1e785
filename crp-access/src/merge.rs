//! Merge Candidate Evaluator
//!
//! Turns a [`MatchReport`] into merge proposals. Everything it emits about
//! programs is a [`StandardProgramId`], which only the Program Registry can
//! produce, so widening the evaluator to Confidential programs means
//! changing that type.

use crp_common::ClientId;
use serde::Serialize;

use crate::matching::{Confidence, MatchReport, MatchStatus, MatchSubject, MatchedField};
use crate::registry::{StandardProgramId, StandardUniverse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRecommendation {
    /// High confidence: merge after staff confirmation
    Merge,
    /// Low confidence: needs manual review
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeProposal {
    /// Older record, kept
    pub survivor: ClientId,
    /// Newer record, folded into the survivor
    pub duplicate: ClientId,
    pub recommendation: MergeRecommendation,
    pub matched_field: MatchedField,
    /// Standard programs both records are active in
    pub shared_programs: Vec<StandardProgramId>,
}

pub struct MergeCandidateEvaluator;

impl MergeCandidateEvaluator {
    /// Proposals for `subject` from its match report
    ///
    /// Both records must still have an active program in `universe`; a
    /// program that turned Confidential after matching ran drops out here.
    /// An unavailable report proposes nothing.
    pub fn propose(
        universe: &StandardUniverse,
        subject: &MatchSubject,
        report: &MatchReport,
    ) -> Vec<MergeProposal> {
        if report.status == MatchStatus::Unavailable {
            return Vec::new();
        }

        let subject_programs: Vec<StandardProgramId> = subject
            .programs()
            .iter()
            .filter_map(|p| universe.get(p))
            .collect();
        if subject_programs.is_empty() {
            return Vec::new();
        }

        report
            .candidates
            .iter()
            .filter(|c| c.client_id() != subject.client_id())
            .filter_map(|candidate| {
                let candidate_programs: Vec<StandardProgramId> = candidate
                    .programs()
                    .iter()
                    .filter_map(|p| universe.get(p))
                    .collect();
                if candidate_programs.is_empty() {
                    return None;
                }

                let shared_programs = subject_programs
                    .iter()
                    .filter(|p| candidate_programs.contains(p))
                    .copied()
                    .collect();

                let subject_first = (subject.created_at(), subject.client_id())
                    <= (candidate.created_at(), candidate.client_id());
                let (survivor, duplicate) = if subject_first {
                    (subject.client_id(), candidate.client_id())
                } else {
                    (candidate.client_id(), subject.client_id())
                };

                Some(MergeProposal {
                    survivor,
                    duplicate,
                    recommendation: match candidate.confidence() {
                        Confidence::High => MergeRecommendation::Merge,
                        Confidence::Low => MergeRecommendation::Review,
                    },
                    matched_field: candidate.matched_field(),
                    shared_programs,
                })
            })
            .collect()
    }
}
