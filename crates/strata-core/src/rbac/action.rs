// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The closed action taxonomy for authorization checks.

use std::fmt;

/// An action a subject carries out on a resource.
///
/// Every mutating engine operation names exactly one action from this
/// enumeration and checks it before any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read a single run.
    GetRun,
    /// List runs in a workspace.
    ListRuns,
    /// Create a new run.
    CreateRun,
    /// Confirm a planned run for apply.
    ApplyRun,
    /// Abandon a run without applying.
    DiscardRun,
    /// Cancel a run.
    CancelRun,

    /// Submit a new state version.
    CreateStateVersion,
    /// List a workspace's state version history.
    ListStateVersions,
    /// Read a single state version.
    GetStateVersion,
    /// Remove a state version from history.
    DeleteStateVersion,
    /// Restore a historical state version as the new current version.
    RollbackStateVersion,
    /// Download raw state content.
    DownloadState,
    /// Read a state version output value.
    GetStateVersionOutput,

    /// List workspaces in an organization.
    ListWorkspaces,
    /// Read a single workspace.
    GetWorkspace,
    /// Create a workspace.
    CreateWorkspace,
    /// Update workspace settings.
    UpdateWorkspace,
    /// Destroy a workspace and its history.
    DeleteWorkspace,
    /// Take the workspace lock manually.
    LockWorkspace,
    /// Release a self-held workspace lock.
    UnlockWorkspace,
    /// Release a lock held by another subject.
    ForceUnlockWorkspace,
    /// Grant a team a role on a workspace.
    SetWorkspacePermission,
    /// Revoke a team's role on a workspace.
    UnsetWorkspacePermission,
}

impl Action {
    /// Stable snake_case name, used in log lines and denial messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetRun => "get_run",
            Self::ListRuns => "list_runs",
            Self::CreateRun => "create_run",
            Self::ApplyRun => "apply_run",
            Self::DiscardRun => "discard_run",
            Self::CancelRun => "cancel_run",
            Self::CreateStateVersion => "create_state_version",
            Self::ListStateVersions => "list_state_versions",
            Self::GetStateVersion => "get_state_version",
            Self::DeleteStateVersion => "delete_state_version",
            Self::RollbackStateVersion => "rollback_state_version",
            Self::DownloadState => "download_state",
            Self::GetStateVersionOutput => "get_state_version_output",
            Self::ListWorkspaces => "list_workspaces",
            Self::GetWorkspace => "get_workspace",
            Self::CreateWorkspace => "create_workspace",
            Self::UpdateWorkspace => "update_workspace",
            Self::DeleteWorkspace => "delete_workspace",
            Self::LockWorkspace => "lock_workspace",
            Self::UnlockWorkspace => "unlock_workspace",
            Self::ForceUnlockWorkspace => "force_unlock_workspace",
            Self::SetWorkspacePermission => "set_workspace_permission",
            Self::UnsetWorkspacePermission => "unset_workspace_permission",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
