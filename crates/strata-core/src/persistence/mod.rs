// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for strata-core.
//!
//! This module defines the persistence abstraction and backend
//! implementations. Handlers depend on the [`Persistence`] trait only; the
//! SQLite and PostgreSQL backends are interchangeable.
//!
//! Two operations carry the engine's consistency guarantees and are
//! deliberately composite so each backend can run them in one transaction:
//!
//! - [`Persistence::transition_run`] performs a compare-and-swap on the run
//!   status and appends the transition timestamp atomically; a `false`
//!   return means the run had already left the expected status and the
//!   caller's signal is a duplicate.
//! - [`Persistence::insert_state_version`] inserts the version with its
//!   outputs and repoints the workspace's current-version reference in the
//!   same transaction, guarded on the current pointer not having moved since
//!   the caller observed it; a `false` return means a concurrent writer won.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::run::{ResourceReport, RunStatus};

/// Workspace record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkspaceRecord {
    /// Unique workspace identifier.
    pub workspace_id: String,
    /// Organization the workspace belongs to.
    pub organization: String,
    /// Workspace name, unique within its organization.
    pub name: String,
    /// Execution mode (remote, local, agent).
    pub execution_mode: String,
    /// Identity currently holding the workspace lock, if any.
    pub locked_by: Option<String>,
    /// The workspace's current state version, if any state has been written.
    pub current_state_version_id: Option<String>,
    /// When the workspace was created.
    pub created_at: DateTime<Utc>,
}

/// Run record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    /// Unique run identifier.
    pub run_id: String,
    /// Workspace this run targets.
    pub workspace_id: String,
    /// Configuration version being planned and applied.
    pub configuration_version_id: String,
    /// Current status (pending, queued, planning, planned, applying,
    /// applied, discarded, errored, canceled).
    pub status: String,
    /// What triggered the run (ui, api, webhook).
    pub source: String,
    /// Whether the run stops after the plan phase.
    pub plan_only: bool,
    /// Whether the apply phase starts automatically after the plan.
    pub auto_apply: bool,
    /// Whether the run may still be canceled mid-apply.
    pub cancelable: bool,
    /// When cancellation was requested, if it was.
    pub cancel_signaled_at: Option<DateTime<Utc>>,
    /// Plan phase resource additions.
    pub plan_additions: Option<i64>,
    /// Plan phase resource changes.
    pub plan_changes: Option<i64>,
    /// Plan phase resource destructions.
    pub plan_destructions: Option<i64>,
    /// Apply phase resource additions.
    pub apply_additions: Option<i64>,
    /// Apply phase resource changes.
    pub apply_changes: Option<i64>,
    /// Apply phase resource destructions.
    pub apply_destructions: Option<i64>,
    /// Failure details when the run errored.
    pub error_message: Option<String>,
    /// When the run was created; also the FIFO queue ordering key.
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    /// The status column parsed into the domain enum.
    pub fn run_status(&self) -> Result<RunStatus, EngineError> {
        self.status.parse().map_err(|_| EngineError::Database {
            operation: "decode".to_string(),
            details: format!("run '{}' has unknown status '{}'", self.run_id, self.status),
        })
    }

    /// Plan phase report, present once the plan has finished.
    pub fn plan_report(&self) -> Option<ResourceReport> {
        match (self.plan_additions, self.plan_changes, self.plan_destructions) {
            (Some(additions), Some(changes), Some(destructions)) => Some(ResourceReport {
                additions,
                changes,
                destructions,
            }),
            _ => None,
        }
    }

    /// Apply phase report, present once the apply has finished.
    pub fn apply_report(&self) -> Option<ResourceReport> {
        match (
            self.apply_additions,
            self.apply_changes,
            self.apply_destructions,
        ) {
            (Some(additions), Some(changes), Some(destructions)) => Some(ResourceReport {
                additions,
                changes,
                destructions,
            }),
            _ => None,
        }
    }

    /// Whether the run is finished, counting `planned` for plan-only runs.
    pub fn is_done(&self) -> bool {
        match self.run_status() {
            Ok(status) => status.is_terminal() || (self.plan_only && status == RunStatus::Planned),
            Err(_) => false,
        }
    }
}

/// State version record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StateVersionRecord {
    /// Unique state version identifier.
    pub state_version_id: String,
    /// Workspace this version belongs to.
    pub workspace_id: String,
    /// Monotonic serial within the workspace.
    pub serial: i64,
    /// Hex SHA-256 digest of the raw state payload.
    pub digest: String,
    /// Raw state payload.
    pub state: Vec<u8>,
    /// When the version was created.
    pub created_at: DateTime<Utc>,
}

/// Output record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutputRecord {
    /// Unique output identifier.
    pub output_id: String,
    /// State version this output belongs to.
    pub state_version_id: String,
    /// Output name, unique within its version.
    pub name: String,
    /// Type tag derived from the output value.
    pub output_type: String,
    /// JSON-encoded output value.
    pub value: Vec<u8>,
    /// Whether the value is marked sensitive.
    pub sensitive: bool,
}

/// One team's granted role on a workspace.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkspacePermissionRecord {
    /// The workspace the grant applies to.
    pub workspace_id: String,
    /// The granted team.
    pub team_id: String,
    /// The granted role (read, plan, write, admin).
    pub role: String,
}

/// One recorded run status transition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunStatusTimestampRecord {
    /// The run the transition belongs to.
    pub run_id: String,
    /// The status the run entered.
    pub status: String,
    /// When the run entered it.
    pub timestamp: DateTime<Utc>,
}

/// Persistence interface used by the engine.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ========================================================================
    // Workspaces
    // ========================================================================

    async fn create_workspace(&self, workspace: &WorkspaceRecord) -> Result<(), EngineError>;

    async fn get_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceRecord>, EngineError>;

    async fn list_workspaces(
        &self,
        organization: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkspaceRecord>, EngineError>;

    async fn count_workspaces(&self, organization: Option<&str>) -> Result<i64, EngineError>;

    /// Delete a workspace and everything it owns. Returns false if absent.
    async fn delete_workspace(&self, workspace_id: &str) -> Result<bool, EngineError>;

    /// Take the workspace lock for `holder`.
    ///
    /// Guarded single-statement update: succeeds only while the lock is
    /// free, so two concurrent acquirers cannot both win.
    async fn acquire_lock(&self, workspace_id: &str, holder: &str) -> Result<bool, EngineError>;

    /// Release the workspace lock if `holder` holds it.
    async fn release_lock(&self, workspace_id: &str, holder: &str) -> Result<bool, EngineError>;

    /// Release the workspace lock regardless of holder.
    async fn force_release_lock(&self, workspace_id: &str) -> Result<bool, EngineError>;

    /// Grant (or replace) a team's role on a workspace.
    async fn set_workspace_permission(
        &self,
        workspace_id: &str,
        team_id: &str,
        role: &str,
    ) -> Result<(), EngineError>;

    /// Revoke a team's role on a workspace. Returns false if no grant existed.
    async fn unset_workspace_permission(
        &self,
        workspace_id: &str,
        team_id: &str,
    ) -> Result<bool, EngineError>;

    async fn list_workspace_permissions(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<WorkspacePermissionRecord>, EngineError>;

    // ========================================================================
    // Runs
    // ========================================================================

    /// Insert a run and its initial status timestamp atomically.
    async fn create_run(&self, run: &RunRecord) -> Result<(), EngineError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, EngineError>;

    async fn list_runs(
        &self,
        workspace_id: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RunRecord>, EngineError>;

    async fn count_runs(
        &self,
        workspace_id: Option<&str>,
        status: Option<&str>,
    ) -> Result<i64, EngineError>;

    /// Compare-and-swap the run status and append the transition timestamp
    /// in one transaction.
    ///
    /// Returns false when the run was not in `from`, which callers treat as
    /// a duplicate or late signal.
    async fn transition_run(
        &self,
        run_id: &str,
        from: &str,
        to: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, EngineError>;

    async fn record_plan_report(
        &self,
        run_id: &str,
        report: &ResourceReport,
    ) -> Result<(), EngineError>;

    async fn record_apply_report(
        &self,
        run_id: &str,
        report: &ResourceReport,
    ) -> Result<(), EngineError>;

    async fn record_run_error(&self, run_id: &str, message: &str) -> Result<(), EngineError>;

    /// Record that cancellation was requested for the run.
    async fn signal_cancel(&self, run_id: &str, at: DateTime<Utc>) -> Result<(), EngineError>;

    /// Flip whether the run may still be canceled mid-apply.
    async fn set_cancelable(&self, run_id: &str, cancelable: bool) -> Result<(), EngineError>;

    /// The oldest queued run for a workspace, if any.
    async fn oldest_queued_run(
        &self,
        workspace_id: &str,
    ) -> Result<Option<RunRecord>, EngineError>;

    /// 1-based position of a queued run within its workspace queue.
    async fn queued_position(&self, workspace_id: &str, run_id: &str)
    -> Result<i64, EngineError>;

    /// Number of runs currently in planning, planned, or applying.
    async fn count_active_runs(&self, workspace_id: &str) -> Result<i64, EngineError>;

    /// All recorded status transitions for a run, oldest first.
    async fn list_run_timestamps(
        &self,
        run_id: &str,
    ) -> Result<Vec<RunStatusTimestampRecord>, EngineError>;

    // ========================================================================
    // State versions
    // ========================================================================

    /// Insert a state version with its outputs and repoint the workspace's
    /// current-version reference, all in one transaction.
    ///
    /// The repoint is guarded on the workspace's current pointer still being
    /// `expected_current`; when a concurrent writer moved it first, nothing
    /// is written and false is returned.
    async fn insert_state_version(
        &self,
        version: &StateVersionRecord,
        outputs: &[OutputRecord],
        expected_current: Option<&str>,
    ) -> Result<bool, EngineError>;

    async fn get_state_version(
        &self,
        state_version_id: &str,
    ) -> Result<Option<StateVersionRecord>, EngineError>;

    async fn get_current_state_version(
        &self,
        workspace_id: &str,
    ) -> Result<Option<StateVersionRecord>, EngineError>;

    /// List a workspace's versions, newest first.
    async fn list_state_versions(
        &self,
        workspace_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StateVersionRecord>, EngineError>;

    async fn count_state_versions(&self, workspace_id: &str) -> Result<i64, EngineError>;

    /// Delete a version unless it is some workspace's current version.
    ///
    /// Returns false when nothing was deleted, either because the version is
    /// absent or because it is still current.
    async fn delete_state_version(&self, state_version_id: &str) -> Result<bool, EngineError>;

    async fn list_outputs(
        &self,
        state_version_id: &str,
    ) -> Result<Vec<OutputRecord>, EngineError>;

    async fn get_output(&self, output_id: &str) -> Result<Option<OutputRecord>, EngineError>;

    // ========================================================================
    // Health
    // ========================================================================

    async fn health_check_db(&self) -> Result<bool, EngineError>;
}
