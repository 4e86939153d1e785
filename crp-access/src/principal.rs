//! Requesting principals
//!
//! A principal is the identity plus the single active role/program selection
//! a request runs under. It arrives from the session layer with every
//! request; no client data crosses that boundary.
//!
//! There is no privileged principal shape. An administrator is a principal
//! like any other and sees exactly what its own assignments allow.

use crp_common::{ProgramId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AccessError, Result};

/// Role the user is currently acting under
///
/// Recorded in audit events. The visibility filter never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveRole {
    Staff,
    ProgramManager,
    Administrator,
    Reporting,
    MergeTool,
}

impl ActiveRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveRole::Staff => "staff",
            ActiveRole::ProgramManager => "program_manager",
            ActiveRole::Administrator => "administrator",
            ActiveRole::Reporting => "reporting",
            ActiveRole::MergeTool => "merge_tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staff" => Some(ActiveRole::Staff),
            "program_manager" => Some(ActiveRole::ProgramManager),
            "administrator" => Some(ActiveRole::Administrator),
            "reporting" => Some(ActiveRole::Reporting),
            "merge_tool" => Some(ActiveRole::MergeTool),
            _ => None,
        }
    }
}

impl fmt::Display for ActiveRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(UserId, ActiveRole, ProgramAssignments)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub active_role: ActiveRole,
    /// Programs of the active selection
    #[serde(default)]
    pub assignments: Vec<ProgramId>,
}

impl Principal {
    pub fn new(
        user_id: UserId,
        active_role: ActiveRole,
        assignments: impl IntoIterator<Item = ProgramId>,
    ) -> Self {
        let mut assignments: Vec<ProgramId> = assignments.into_iter().collect();
        assignments.sort();
        assignments.dedup();
        Self {
            user_id,
            active_role,
            assignments,
        }
    }

    /// Reject malformed principals
    ///
    /// A nil identity or a nil program assignment is an upstream bug, not a
    /// request for "no access", and is surfaced as such.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_nil() {
            return Err(AccessError::FilterInputInvalid(
                "principal has a nil user id".to_string(),
            ));
        }
        if self.assignments.iter().any(|p| p.is_nil()) {
            return Err(AccessError::FilterInputInvalid(
                "principal has a nil program assignment".to_string(),
            ));
        }
        Ok(())
    }

    /// Direct assignment to a program in the active selection
    pub fn is_assigned(&self, program: &ProgramId) -> bool {
        self.assignments.contains(program)
    }
}
