// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workspace roles and the actions they permit.

use std::fmt;
use std::str::FromStr;

use super::Action;

/// A named role a team holds on a workspace.
///
/// Roles are cumulative: each role permits everything the weaker roles
/// permit plus its own action set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Read runs, state, and workspace settings.
    Read,
    /// Read plus creating (plan-only) runs.
    Plan,
    /// Plan plus applying runs and writing state.
    Write,
    /// Full control of the workspace, including permission management.
    Admin,
}

impl Role {
    /// Whether this role permits the given action.
    pub fn allows(&self, action: Action) -> bool {
        match self {
            Self::Read => matches!(
                action,
                Action::GetRun
                    | Action::ListRuns
                    | Action::GetWorkspace
                    | Action::ListWorkspaces
                    | Action::ListStateVersions
                    | Action::GetStateVersion
                    | Action::GetStateVersionOutput
                    | Action::DownloadState
            ),
            Self::Plan => Self::Read.allows(action) || matches!(action, Action::CreateRun),
            Self::Write => {
                Self::Plan.allows(action)
                    || matches!(
                        action,
                        Action::ApplyRun
                            | Action::DiscardRun
                            | Action::CancelRun
                            | Action::CreateStateVersion
                            | Action::RollbackStateVersion
                            | Action::DeleteStateVersion
                            | Action::LockWorkspace
                            | Action::UnlockWorkspace
                    )
            }
            Self::Admin => {
                Self::Write.allows(action)
                    || matches!(
                        action,
                        Action::UpdateWorkspace
                            | Action::DeleteWorkspace
                            | Action::ForceUnlockWorkspace
                            | Action::SetWorkspacePermission
                            | Action::UnsetWorkspacePermission
                    )
            }
        }
    }

    /// Stable string form, used as the persisted role column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Plan => "plan",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "plan" => Ok(Self::Plan),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_cumulative() {
        // Everything read allows, every stronger role allows too.
        for action in [
            Action::GetRun,
            Action::ListRuns,
            Action::GetWorkspace,
            Action::ListStateVersions,
            Action::GetStateVersion,
            Action::DownloadState,
        ] {
            assert!(Role::Read.allows(action), "read should allow {action}");
            assert!(Role::Plan.allows(action), "plan should allow {action}");
            assert!(Role::Write.allows(action), "write should allow {action}");
            assert!(Role::Admin.allows(action), "admin should allow {action}");
        }
    }

    #[test]
    fn test_read_cannot_mutate() {
        for action in [
            Action::CreateRun,
            Action::ApplyRun,
            Action::CreateStateVersion,
            Action::RollbackStateVersion,
            Action::DeleteWorkspace,
        ] {
            assert!(!Role::Read.allows(action), "read should not allow {action}");
        }
    }

    #[test]
    fn test_plan_can_create_but_not_apply() {
        assert!(Role::Plan.allows(Action::CreateRun));
        assert!(!Role::Plan.allows(Action::ApplyRun));
        assert!(!Role::Plan.allows(Action::CreateStateVersion));
    }

    #[test]
    fn test_write_can_apply_but_not_administer() {
        assert!(Role::Write.allows(Action::ApplyRun));
        assert!(Role::Write.allows(Action::CreateStateVersion));
        assert!(Role::Write.allows(Action::RollbackStateVersion));
        assert!(!Role::Write.allows(Action::SetWorkspacePermission));
        assert!(!Role::Write.allows(Action::ForceUnlockWorkspace));
        assert!(!Role::Write.allows(Action::DeleteWorkspace));
    }

    #[test]
    fn test_admin_allows_everything_workspace_scoped() {
        for action in [
            Action::ApplyRun,
            Action::DeleteWorkspace,
            Action::SetWorkspacePermission,
            Action::UnsetWorkspacePermission,
            Action::ForceUnlockWorkspace,
        ] {
            assert!(Role::Admin.allows(action), "admin should allow {action}");
        }
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::Read, Role::Plan, Role::Write, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }
}
