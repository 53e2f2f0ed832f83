// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workspace handlers: CRUD, manual locking, and permission grants.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use tracing::{info, instrument};

use crate::error::EngineError;
use crate::ids;
use crate::persistence::{Persistence, WorkspaceRecord};
use crate::rbac::{self, AccessRequest, Action, PermissionSet, Role, Subject};

use super::HandlerState;

/// Where a workspace's runs execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Phases run on the service's own workers.
    #[default]
    Remote,
    /// Phases run on the user's machine; the service stores state only.
    Local,
    /// Phases run on a self-hosted agent.
    Agent,
}

impl ExecutionMode {
    /// Stable string form, used as the persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Options for creating a workspace.
#[derive(Debug, Clone)]
pub struct CreateWorkspaceOptions {
    /// Owning organization.
    pub organization: String,
    /// Workspace name, unique within the organization.
    pub name: String,
    /// Where runs execute.
    pub execution_mode: ExecutionMode,
}

/// Create a workspace in an organization.
#[instrument(skip(state, subject, opts), fields(organization = %opts.organization, name = %opts.name))]
pub async fn create_workspace(
    state: &HandlerState,
    subject: &Subject,
    opts: CreateWorkspaceOptions,
) -> Result<WorkspaceRecord, EngineError> {
    state.authorize(
        subject,
        Action::CreateWorkspace,
        &AccessRequest::Organization(&opts.organization),
    )?;

    if opts.name.is_empty() {
        return Err(EngineError::Validation {
            field: "name".to_string(),
            message: "is required".to_string(),
        });
    }

    let workspace = WorkspaceRecord {
        workspace_id: ids::new_id(ids::WORKSPACE_PREFIX),
        organization: opts.organization,
        name: opts.name,
        execution_mode: opts.execution_mode.as_str().to_string(),
        locked_by: None,
        current_state_version_id: None,
        created_at: Utc::now(),
    };
    state.persistence.create_workspace(&workspace).await?;
    info!(workspace_id = %workspace.workspace_id, "Workspace created");
    Ok(workspace)
}

/// Fetch one workspace.
pub async fn get_workspace(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
) -> Result<WorkspaceRecord, EngineError> {
    let (workspace, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(subject, Action::GetWorkspace, &AccessRequest::Workspace(&policy))?;
    Ok(workspace)
}

/// List an organization's workspaces.
pub async fn list_workspaces(
    state: &HandlerState,
    subject: &Subject,
    organization: &str,
    limit: Option<i64>,
    offset: i64,
) -> Result<Vec<WorkspaceRecord>, EngineError> {
    state.authorize(
        subject,
        Action::ListWorkspaces,
        &AccessRequest::Organization(organization),
    )?;

    let limit = limit.unwrap_or(state.config.default_page_size);
    state
        .persistence
        .list_workspaces(Some(organization), limit, offset)
        .await
}

/// Destroy a workspace; its runs, state history, and grants go with it.
#[instrument(skip(state, subject))]
pub async fn delete_workspace(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
) -> Result<(), EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(subject, Action::DeleteWorkspace, &AccessRequest::Workspace(&policy))?;

    if !state.persistence.delete_workspace(workspace_id).await? {
        return Err(EngineError::NotFound {
            kind: "workspace",
            id: workspace_id.to_string(),
        });
    }
    info!(workspace_id, "Workspace deleted");
    Ok(())
}

/// Take the workspace lock manually.
///
/// A held lock blocks run activation exactly like a run-held lock; new
/// runs queue behind it until the workspace is unlocked.
#[instrument(skip(state, subject))]
pub async fn lock_workspace(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
) -> Result<WorkspaceRecord, EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(subject, Action::LockWorkspace, &AccessRequest::Workspace(&policy))?;

    if !state
        .persistence
        .acquire_lock(workspace_id, subject.display_id())
        .await?
    {
        return Err(EngineError::LockContention {
            workspace_id: workspace_id.to_string(),
        });
    }
    info!(workspace_id, holder = subject.display_id(), "Workspace locked");

    let (workspace, _) = state.workspace_policy(workspace_id).await?;
    Ok(workspace)
}

/// Release the workspace lock.
///
/// Without `force` only the holder can release; with `force` any subject
/// authorized for force-unlock can. Releasing the lock promotes the next
/// queued run, if any.
#[instrument(skip(state, subject))]
pub async fn unlock_workspace(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
    force: bool,
) -> Result<WorkspaceRecord, EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;

    let released = if force {
        state.authorize(
            subject,
            Action::ForceUnlockWorkspace,
            &AccessRequest::Workspace(&policy),
        )?;
        state.persistence.force_release_lock(workspace_id).await?
    } else {
        state.authorize(
            subject,
            Action::UnlockWorkspace,
            &AccessRequest::Workspace(&policy),
        )?;
        state
            .persistence
            .release_lock(workspace_id, subject.display_id())
            .await?
    };

    if !released {
        return Err(EngineError::Validation {
            field: "lock".to_string(),
            message: format!("not held by '{}'", subject.display_id()),
        });
    }
    info!(workspace_id, "Workspace unlocked");

    state.scheduler().promote_next(workspace_id).await?;

    let (workspace, _) = state.workspace_policy(workspace_id).await?;
    Ok(workspace)
}

/// Grant (or replace) a team's role on a workspace.
#[instrument(skip(state, subject))]
pub async fn set_workspace_permission(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
    team_id: &str,
    role: Role,
) -> Result<(), EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(
        subject,
        Action::SetWorkspacePermission,
        &AccessRequest::Workspace(&policy),
    )?;

    state
        .persistence
        .set_workspace_permission(workspace_id, team_id, role.as_str())
        .await?;
    info!(workspace_id, team_id, role = %role, "Workspace permission set");
    Ok(())
}

/// Revoke a team's role on a workspace.
#[instrument(skip(state, subject))]
pub async fn unset_workspace_permission(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
    team_id: &str,
) -> Result<(), EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(
        subject,
        Action::UnsetWorkspacePermission,
        &AccessRequest::Workspace(&policy),
    )?;

    if !state
        .persistence
        .unset_workspace_permission(workspace_id, team_id)
        .await?
    {
        return Err(EngineError::NotFound {
            kind: "workspace permission",
            id: team_id.to_string(),
        });
    }
    info!(workspace_id, team_id, "Workspace permission unset");
    Ok(())
}

/// The set of operations `subject` may perform on a workspace.
///
/// Used by presentation layers to render available operations; not itself
/// gated (a subject may always ask what it can do).
pub async fn workspace_permissions(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
) -> Result<PermissionSet, EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    Ok(rbac::policy_for(subject, &policy))
}
