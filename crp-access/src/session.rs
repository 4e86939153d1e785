//! Role sessions
//!
//! A user may hold several role/program selections but acts under exactly
//! one at a time. Changing it is an explicit call that is audited before
//! the new principal is handed out.

use crp_common::{ProgramId, UserId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::AccessAuditor;
use crate::error::{AccessError, Result};
use crate::principal::{ActiveRole, Principal};

/// One role/program selection a user may activate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSelection {
    pub role: ActiveRole,
    #[serde(default)]
    pub programs: Vec<ProgramId>,
}

#[derive(Debug, Clone)]
pub struct RoleSession {
    user_id: UserId,
    selections: Vec<RoleSelection>,
    active: usize,
}

impl RoleSession {
    /// Open a session with `initial` as the active selection
    pub fn start(user_id: UserId, selections: Vec<RoleSelection>, initial: usize) -> Result<Self> {
        if initial >= selections.len() {
            return Err(AccessError::InvalidInput(format!(
                "selection {} does not exist ({} available)",
                initial,
                selections.len()
            )));
        }
        let session = Self {
            user_id,
            selections,
            active: initial,
        };
        session.principal().validate()?;
        Ok(session)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn selections(&self) -> &[RoleSelection] {
        &self.selections
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Principal for the active selection only
    pub fn principal(&self) -> Principal {
        let selection = &self.selections[self.active];
        Principal::new(
            self.user_id,
            selection.role,
            selection.programs.iter().copied(),
        )
    }

    /// Activate another selection
    ///
    /// The switch is recorded first; if recording fails the previous
    /// selection stays active. Re-selecting the active one records nothing.
    pub async fn switch_to(&mut self, auditor: &AccessAuditor, index: usize) -> Result<Principal> {
        let Some(next) = self.selections.get(index) else {
            return Err(AccessError::InvalidInput(format!(
                "selection {} does not exist ({} available)",
                index,
                self.selections.len()
            )));
        };

        if index == self.active {
            return Ok(self.principal());
        }

        let from = self.principal();
        let to = Principal::new(self.user_id, next.role, next.programs.iter().copied());
        to.validate()?;

        auditor.record_role_switch(&from, &to).await?;

        self.active = index;
        info!(
            "User {} switched role {} ({} programs) -> {} ({} programs)",
            self.user_id,
            from.active_role,
            from.assignments.len(),
            to.active_role,
            to.assignments.len()
        );
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selections() -> Vec<RoleSelection> {
        vec![
            RoleSelection {
                role: ActiveRole::Staff,
                programs: vec![ProgramId::generate()],
            },
            RoleSelection {
                role: ActiveRole::Administrator,
                programs: vec![],
            },
        ]
    }

    #[test]
    fn test_start_rejects_missing_selection() {
        assert!(RoleSession::start(UserId::generate(), selections(), 2).is_err());
        assert!(RoleSession::start(UserId::generate(), vec![], 0).is_err());
    }

    #[test]
    fn test_principal_reflects_active_selection_only() {
        let sels = selections();
        let session = RoleSession::start(UserId::generate(), sels.clone(), 1).unwrap();
        let principal = session.principal();
        assert_eq!(principal.active_role, ActiveRole::Administrator);
        assert!(principal.assignments.is_empty());
        assert!(!principal.is_assigned(&sels[0].programs[0]));
    }
}
