// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Role-based access control for the engine.
//!
//! The policy engine is a pure function: given a subject, an action, and the
//! scope the action targets, it answers allow or deny. It holds no locks and
//! performs no I/O; callers assemble the [`WorkspacePolicy`] from persistence
//! before asking.
//!
//! Evaluation order:
//!
//! 1. Site admins are allowed everything.
//! 2. Organization owners are allowed everything inside their organization,
//!    including all contained workspaces.
//! 3. A team grant on the workspace allows whatever the granted role allows.
//! 4. Anything else is denied.

mod action;
mod role;

pub use action::Action;
pub use role::Role;

/// A subject performing actions: a human, a team token, or a service.
#[derive(Debug, Clone)]
pub enum Subject {
    /// A site administrator, permitted everything.
    SiteAdmin,
    /// A human user with organization and team memberships.
    User(User),
    /// A team acting directly (e.g. via a team token).
    Team(Team),
    /// A non-human identity acting on behalf of the engine or automation.
    Service(ServiceIdentity),
}

/// A human user.
#[derive(Debug, Clone)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Login name, used in log lines and denial messages.
    pub username: String,
    /// Organizations the user belongs to.
    pub memberships: Vec<OrganizationMembership>,
    /// Teams the user belongs to.
    pub teams: Vec<TeamMembership>,
}

/// A user's membership in one organization.
#[derive(Debug, Clone)]
pub struct OrganizationMembership {
    /// Organization name.
    pub organization: String,
    /// Whether the user is an owner of the organization.
    pub owner: bool,
}

/// A user's membership in one team.
#[derive(Debug, Clone)]
pub struct TeamMembership {
    /// Team ID, matched against workspace permission grants.
    pub team_id: String,
    /// Organization the team belongs to.
    pub organization: String,
}

/// A team acting as a subject in its own right.
#[derive(Debug, Clone)]
pub struct Team {
    /// Team ID, matched against workspace permission grants.
    pub id: String,
    /// Organization the team belongs to.
    pub organization: String,
    /// Whether this is the organization's owners team.
    pub owner: bool,
}

/// A non-human identity.
///
/// With `organization: None` the identity is engine-internal and permitted
/// everything (phase collaborators completing runs); scoped to an
/// organization it is permitted everything within that organization only.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    /// Identity name, used in log lines and denial messages.
    pub id: String,
    /// Organization the identity is confined to, if any.
    pub organization: Option<String>,
}

impl Subject {
    /// Short description for denial messages and log fields.
    pub fn display_id(&self) -> &str {
        match self {
            Self::SiteAdmin => "site-admin",
            Self::User(user) => &user.username,
            Self::Team(team) => &team.id,
            Self::Service(service) => &service.id,
        }
    }

    /// The engine's own identity, used for system-triggered operations.
    pub fn engine() -> Self {
        Self::Service(ServiceIdentity {
            id: "strata-engine".to_string(),
            organization: None,
        })
    }

    fn is_organization_owner(&self, organization: &str) -> bool {
        match self {
            Self::SiteAdmin => true,
            Self::User(user) => user
                .memberships
                .iter()
                .any(|m| m.owner && m.organization == organization),
            Self::Team(team) => team.owner && team.organization == organization,
            Self::Service(service) => match &service.organization {
                None => true,
                Some(org) => org == organization,
            },
        }
    }
}

/// The scope an authorization check targets.
#[derive(Debug, Clone)]
pub enum AccessRequest<'a> {
    /// Site-wide scope; only site admins and internal services qualify.
    Site,
    /// Organization scope, identified by name.
    Organization(&'a str),
    /// Workspace scope, carrying the workspace's permission grants.
    Workspace(&'a WorkspacePolicy),
}

/// A workspace's authorization-relevant attributes, assembled by the caller.
#[derive(Debug, Clone)]
pub struct WorkspacePolicy {
    /// The workspace ID.
    pub workspace_id: String,
    /// Organization the workspace belongs to.
    pub organization: String,
    /// Team grants on the workspace.
    pub permissions: Vec<WorkspacePermission>,
}

/// One team's granted role on a workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePermission {
    /// The granted team.
    pub team_id: String,
    /// The granted role.
    pub role: Role,
}

/// Decide whether `subject` may perform `action` against `request`.
///
/// Side-effect free; the only failure mode is a plain deny.
pub fn can_access(subject: &Subject, action: Action, request: &AccessRequest<'_>) -> bool {
    if matches!(subject, Subject::SiteAdmin) {
        return true;
    }
    match request {
        AccessRequest::Site => matches!(
            subject,
            Subject::Service(ServiceIdentity {
                organization: None,
                ..
            })
        ),
        AccessRequest::Organization(organization) => subject.is_organization_owner(organization),
        AccessRequest::Workspace(policy) => {
            if subject.is_organization_owner(&policy.organization) {
                return true;
            }
            match subject {
                Subject::User(user) => user
                    .teams
                    .iter()
                    .filter(|t| t.organization == policy.organization)
                    .any(|t| granted_role(policy, &t.team_id).is_some_and(|r| r.allows(action))),
                Subject::Team(team) => {
                    team.organization == policy.organization
                        && granted_role(policy, &team.id).is_some_and(|r| r.allows(action))
                }
                _ => false,
            }
        }
    }
}

fn granted_role(policy: &WorkspacePolicy, team_id: &str) -> Option<Role> {
    policy
        .permissions
        .iter()
        .find(|p| p.team_id == team_id)
        .map(|p| p.role)
}

/// The set of operations a subject may perform on one workspace.
///
/// Computed on demand for presentation layers; never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    /// May create runs.
    pub can_create_run: bool,
    /// May confirm planned runs for apply.
    pub can_apply: bool,
    /// May cancel runs.
    pub can_cancel: bool,
    /// May discard runs.
    pub can_discard: bool,
    /// May read state versions and outputs.
    pub can_read_state: bool,
    /// May submit state versions.
    pub can_create_state_version: bool,
    /// May roll back to a historical state version.
    pub can_rollback_state: bool,
    /// May delete historical state versions.
    pub can_delete_state_version: bool,
    /// May take and release the workspace lock.
    pub can_lock: bool,
    /// May release a lock held by someone else.
    pub can_force_unlock: bool,
    /// May update workspace settings.
    pub can_update_workspace: bool,
    /// May destroy the workspace.
    pub can_delete_workspace: bool,
    /// May grant and revoke team permissions.
    pub can_manage_permissions: bool,
}

/// Compute the [`PermissionSet`] for a subject on one workspace.
pub fn policy_for(subject: &Subject, policy: &WorkspacePolicy) -> PermissionSet {
    let request = AccessRequest::Workspace(policy);
    let allowed = |action| can_access(subject, action, &request);
    PermissionSet {
        can_create_run: allowed(Action::CreateRun),
        can_apply: allowed(Action::ApplyRun),
        can_cancel: allowed(Action::CancelRun),
        can_discard: allowed(Action::DiscardRun),
        can_read_state: allowed(Action::GetStateVersion),
        can_create_state_version: allowed(Action::CreateStateVersion),
        can_rollback_state: allowed(Action::RollbackStateVersion),
        can_delete_state_version: allowed(Action::DeleteStateVersion),
        can_lock: allowed(Action::LockWorkspace),
        can_force_unlock: allowed(Action::ForceUnlockWorkspace),
        can_update_workspace: allowed(Action::UpdateWorkspace),
        can_delete_workspace: allowed(Action::DeleteWorkspace),
        can_manage_permissions: allowed(Action::SetWorkspacePermission),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(permissions: Vec<WorkspacePermission>) -> WorkspacePolicy {
        WorkspacePolicy {
            workspace_id: "ws-1".to_string(),
            organization: "acme".to_string(),
            permissions,
        }
    }

    fn user_with_team(team_id: &str) -> Subject {
        Subject::User(User {
            id: "user-1".to_string(),
            username: "dev".to_string(),
            memberships: vec![OrganizationMembership {
                organization: "acme".to_string(),
                owner: false,
            }],
            teams: vec![TeamMembership {
                team_id: team_id.to_string(),
                organization: "acme".to_string(),
            }],
        })
    }

    #[test]
    fn test_site_admin_allowed_everything() {
        let policy = policy(vec![]);
        for request in [
            AccessRequest::Site,
            AccessRequest::Organization("acme"),
            AccessRequest::Workspace(&policy),
        ] {
            assert!(can_access(&Subject::SiteAdmin, Action::DeleteWorkspace, &request));
        }
    }

    #[test]
    fn test_org_owner_allowed_contained_workspaces() {
        let subject = Subject::User(User {
            id: "user-1".to_string(),
            username: "boss".to_string(),
            memberships: vec![OrganizationMembership {
                organization: "acme".to_string(),
                owner: true,
            }],
            teams: vec![],
        });
        let policy = policy(vec![]);
        assert!(can_access(
            &subject,
            Action::DeleteWorkspace,
            &AccessRequest::Workspace(&policy)
        ));
        assert!(can_access(
            &subject,
            Action::CreateWorkspace,
            &AccessRequest::Organization("acme")
        ));
        // Ownership does not leak across organizations.
        assert!(!can_access(
            &subject,
            Action::CreateWorkspace,
            &AccessRequest::Organization("umbrella")
        ));
    }

    #[test]
    fn test_team_grant_allows_granted_role_only() {
        let subject = user_with_team("team-ops");
        let policy = policy(vec![WorkspacePermission {
            team_id: "team-ops".to_string(),
            role: Role::Plan,
        }]);
        let request = AccessRequest::Workspace(&policy);

        assert!(can_access(&subject, Action::CreateRun, &request));
        assert!(can_access(&subject, Action::GetStateVersion, &request));
        assert!(!can_access(&subject, Action::ApplyRun, &request));
        assert!(!can_access(&subject, Action::SetWorkspacePermission, &request));
    }

    #[test]
    fn test_absent_grant_denies() {
        let subject = user_with_team("team-dev");
        let policy = policy(vec![WorkspacePermission {
            team_id: "team-ops".to_string(),
            role: Role::Admin,
        }]);
        assert!(!can_access(
            &subject,
            Action::GetRun,
            &AccessRequest::Workspace(&policy)
        ));
    }

    #[test]
    fn test_team_subject_uses_own_grant() {
        let subject = Subject::Team(Team {
            id: "team-ops".to_string(),
            organization: "acme".to_string(),
            owner: false,
        });
        let granted = policy(vec![WorkspacePermission {
            team_id: "team-ops".to_string(),
            role: Role::Write,
        }]);
        assert!(can_access(
            &subject,
            Action::ApplyRun,
            &AccessRequest::Workspace(&granted)
        ));

        let ungranted = policy(vec![]);
        assert!(!can_access(
            &subject,
            Action::GetRun,
            &AccessRequest::Workspace(&ungranted)
        ));
    }

    #[test]
    fn test_engine_identity_is_site_wide() {
        let subject = Subject::engine();
        let policy = policy(vec![]);
        assert!(can_access(&subject, Action::CreateStateVersion, &AccessRequest::Workspace(&policy)));
        assert!(can_access(&subject, Action::CreateWorkspace, &AccessRequest::Site));
    }

    #[test]
    fn test_scoped_service_confined_to_organization() {
        let subject = Subject::Service(ServiceIdentity {
            id: "ci-bot".to_string(),
            organization: Some("acme".to_string()),
        });
        let acme_ws = policy(vec![]);
        assert!(can_access(
            &subject,
            Action::CreateRun,
            &AccessRequest::Workspace(&acme_ws)
        ));
        let mut other_ws = acme_ws.clone();
        other_ws.organization = "umbrella".to_string();
        assert!(!can_access(
            &subject,
            Action::CreateRun,
            &AccessRequest::Workspace(&other_ws)
        ));
        assert!(!can_access(&subject, Action::CreateWorkspace, &AccessRequest::Site));
    }

    #[test]
    fn test_permission_set_reflects_role() {
        let subject = user_with_team("team-ops");
        let policy = policy(vec![WorkspacePermission {
            team_id: "team-ops".to_string(),
            role: Role::Write,
        }]);
        let set = policy_for(&subject, &policy);
        assert!(set.can_create_run);
        assert!(set.can_apply);
        assert!(set.can_create_state_version);
        assert!(set.can_lock);
        assert!(!set.can_manage_permissions);
        assert!(!set.can_delete_workspace);
        assert!(!set.can_force_unlock);
    }
}
