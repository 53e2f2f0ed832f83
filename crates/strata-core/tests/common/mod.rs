// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for strata-core integration tests.
//!
//! Provides TestContext wiring the handlers over a throwaway SQLite
//! database, a capturing event sink, and a recording phase dispatcher.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use strata_core::config::Config;
use strata_core::dispatch::PhaseDispatcher;
use strata_core::error::EngineError;
use strata_core::events::{Event, MemorySink};
use strata_core::handlers::workspace::{CreateWorkspaceOptions, ExecutionMode};
use strata_core::handlers::{self, HandlerState};
use strata_core::persistence::{Persistence, SqlitePersistence, WorkspaceRecord};
use strata_core::rbac::{
    OrganizationMembership, Role, Subject, TeamMembership, User,
};
use strata_core::run::{CreateRunOptions, Phase, RunSource};

pub const ORGANIZATION: &str = "acme";

/// Phase dispatcher that records every dispatch and cancel.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    pub dispatched: Mutex<Vec<(String, Phase)>>,
    pub canceled: Mutex<Vec<String>>,
}

#[async_trait]
impl PhaseDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        run_id: &str,
        phase: Phase,
        _configuration_version_id: &str,
    ) -> Result<(), EngineError> {
        self.dispatched
            .lock()
            .unwrap()
            .push((run_id.to_string(), phase));
        Ok(())
    }

    async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        self.canceled.lock().unwrap().push(run_id.to_string());
        Ok(())
    }
}

impl RecordingDispatcher {
    pub fn dispatches(&self) -> Vec<(String, Phase)> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.canceled.lock().unwrap().clone()
    }
}

/// Test context over a throwaway SQLite database.
pub struct TestContext {
    pub state: HandlerState,
    pub persistence: Arc<SqlitePersistence>,
    pub sink: Arc<MemorySink>,
    pub dispatcher: Arc<RecordingDispatcher>,
    _tmp: tempfile::TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        init_tracing();

        let tmp = tempfile::tempdir().expect("Failed to create tempdir");
        let persistence = Arc::new(
            SqlitePersistence::from_path(tmp.path().join("strata.db"))
                .await
                .expect("Failed to set up SQLite"),
        );
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let state = HandlerState::new(
            persistence.clone(),
            sink.clone(),
            dispatcher.clone(),
            Config::default(),
        );

        Self {
            state,
            persistence,
            sink,
            dispatcher,
            _tmp: tmp,
        }
    }

    /// Create a workspace in the test organization.
    pub async fn create_workspace(&self, name: &str) -> WorkspaceRecord {
        handlers::workspace::create_workspace(
            &self.state,
            &admin(),
            CreateWorkspaceOptions {
                organization: ORGANIZATION.to_string(),
                name: name.to_string(),
                execution_mode: ExecutionMode::Remote,
            },
        )
        .await
        .expect("Failed to create workspace")
    }

    /// Grant a team a role on a workspace.
    pub async fn grant(&self, workspace_id: &str, team_id: &str, role: Role) {
        handlers::workspace::set_workspace_permission(
            &self.state,
            &admin(),
            workspace_id,
            team_id,
            role,
        )
        .await
        .expect("Failed to set workspace permission");
    }

    /// Create a run with default options.
    pub async fn create_run(&self, workspace_id: &str) -> handlers::run::CreatedRun {
        self.create_run_with(workspace_id, false, false).await
    }

    pub async fn create_run_with(
        &self,
        workspace_id: &str,
        plan_only: bool,
        auto_apply: bool,
    ) -> handlers::run::CreatedRun {
        handlers::run::create_run(
            &self.state,
            &admin(),
            CreateRunOptions {
                workspace_id: workspace_id.to_string(),
                configuration_version_id: "cv-test".to_string(),
                source: RunSource::Api,
                plan_only,
                auto_apply,
            },
        )
        .await
        .expect("Failed to create run")
    }

    /// Current status column of a run, straight from the database.
    pub async fn run_status(&self, run_id: &str) -> String {
        self.persistence
            .get_run(run_id)
            .await
            .expect("Failed to fetch run")
            .expect("Run not found")
            .status
    }

    /// Count of run status change events delivered to a given (run, status).
    pub fn status_change_events_to(&self, run_id: &str, to: &str) -> usize {
        self.sink
            .events()
            .iter()
            .filter(|event| match event {
                Event::RunStatusChanged {
                    run_id: id, to: t, ..
                } => id == run_id && t.as_str() == to,
                _ => false,
            })
            .count()
    }
}

/// A site admin, allowed everything.
pub fn admin() -> Subject {
    Subject::SiteAdmin
}

/// A user whose only access comes through one team membership.
pub fn team_member(team_id: &str) -> Subject {
    Subject::User(User {
        id: format!("user-{team_id}"),
        username: format!("member-of-{team_id}"),
        memberships: vec![OrganizationMembership {
            organization: ORGANIZATION.to_string(),
            owner: false,
        }],
        teams: vec![TeamMembership {
            team_id: team_id.to_string(),
            organization: ORGANIZATION.to_string(),
        }],
    })
}

/// A user with no memberships at all.
pub fn outsider() -> Subject {
    Subject::User(User {
        id: "user-outsider".to_string(),
        username: "outsider".to_string(),
        memberships: vec![],
        teams: vec![],
    })
}

/// A state payload with the given serial and a marker output, so different
/// markers produce different digests at the same serial.
pub fn state_payload(serial: i64, marker: &str) -> Vec<u8> {
    json!({
        "version": 4,
        "serial": serial,
        "lineage": "test-lineage",
        "outputs": {
            "marker": {"value": marker},
            "password": {"value": "hunter2", "sensitive": true},
            "replica_count": {"value": 3}
        }
    })
    .to_string()
    .into_bytes()
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
