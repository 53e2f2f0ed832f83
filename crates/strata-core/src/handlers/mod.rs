// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestration facade handlers.
//!
//! Every public operation composes the same way: authorize, validate domain
//! invariants, mutate, emit events. Handlers are free functions over a
//! shared [`HandlerState`], split by resource:
//!
//! - [`run`]: run lifecycle and the phase-completion surface
//! - [`state`]: state version CRUD, rollback, and outputs
//! - [`workspace`]: workspace CRUD, locking, and permission grants

pub mod run;
pub mod state;
pub mod workspace;

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::dispatch::PhaseDispatcher;
use crate::error::EngineError;
use crate::events::EventSink;
use crate::persistence::{Persistence, WorkspaceRecord};
use crate::rbac::{self, AccessRequest, Action, Subject, WorkspacePermission, WorkspacePolicy};
use crate::scheduler::RunScheduler;
use crate::state::StateVersionStore;

/// Shared state for the orchestration handlers.
pub struct HandlerState {
    /// Persistence implementation.
    pub persistence: Arc<dyn Persistence>,
    /// Event sink for domain events.
    pub events: Arc<dyn EventSink>,
    /// Phase execution collaborator.
    pub dispatcher: Arc<dyn PhaseDispatcher>,
    /// Engine configuration.
    pub config: Config,
    scheduler: RunScheduler,
    store: StateVersionStore,
}

impl HandlerState {
    /// Create handler state wiring the scheduler and version store over the
    /// same persistence and event sink.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        events: Arc<dyn EventSink>,
        dispatcher: Arc<dyn PhaseDispatcher>,
        config: Config,
    ) -> Self {
        let scheduler = RunScheduler::new(persistence.clone(), events.clone());
        let store = StateVersionStore::new(persistence.clone(), events.clone());
        Self {
            persistence,
            events,
            dispatcher,
            config,
            scheduler,
            store,
        }
    }

    /// The run scheduler.
    pub fn scheduler(&self) -> &RunScheduler {
        &self.scheduler
    }

    /// The state version store.
    pub fn store(&self) -> &StateVersionStore {
        &self.store
    }

    /// Load a workspace and assemble its authorization policy.
    pub(crate) async fn workspace_policy(
        &self,
        workspace_id: &str,
    ) -> Result<(WorkspaceRecord, WorkspacePolicy), EngineError> {
        let workspace = self
            .persistence
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "workspace",
                id: workspace_id.to_string(),
            })?;

        let mut permissions = Vec::new();
        for grant in self
            .persistence
            .list_workspace_permissions(workspace_id)
            .await?
        {
            match grant.role.parse() {
                Ok(role) => permissions.push(WorkspacePermission {
                    team_id: grant.team_id,
                    role,
                }),
                Err(_) => {
                    warn!(
                        workspace_id,
                        team_id = %grant.team_id,
                        role = %grant.role,
                        "Skipping permission grant with unknown role"
                    );
                }
            }
        }

        let policy = WorkspacePolicy {
            workspace_id: workspace.workspace_id.clone(),
            organization: workspace.organization.clone(),
            permissions,
        };
        Ok((workspace, policy))
    }

    /// Check an action against a scope; deny with [`EngineError::Forbidden`].
    pub(crate) fn authorize(
        &self,
        subject: &Subject,
        action: Action,
        request: &AccessRequest<'_>,
    ) -> Result<(), EngineError> {
        if rbac::can_access(subject, action, request) {
            Ok(())
        } else {
            warn!(
                subject = subject.display_id(),
                action = action.as_str(),
                "Authorization denied"
            );
            Err(EngineError::Forbidden {
                action: action.as_str().to_string(),
                subject: subject.display_id().to_string(),
            })
        }
    }
}
