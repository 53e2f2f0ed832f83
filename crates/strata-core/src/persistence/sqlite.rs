//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::EngineError;
use crate::run::ResourceReport;

use super::{
    OutputRecord, Persistence, RunRecord, RunStatusTimestampRecord, StateVersionRecord,
    WorkspacePermissionRecord, WorkspaceRecord,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects to the database with sensible defaults
    /// - Runs all migrations
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file (e.g., ".data/strata.db")
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        // Build connection URL
        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        // Create pool with reasonable defaults
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        // Run migrations
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn create_workspace(&self, workspace: &WorkspaceRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO workspaces
                (workspace_id, organization, name, execution_mode, locked_by,
                 current_state_version_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workspace.workspace_id)
        .bind(&workspace.organization)
        .bind(&workspace.name)
        .bind(&workspace.execution_mode)
        .bind(&workspace.locked_by)
        .bind(&workspace.current_state_version_id)
        .bind(workspace.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceRecord>, EngineError> {
        let record = sqlx::query_as::<_, WorkspaceRecord>(
            r#"
            SELECT workspace_id, organization, name, execution_mode, locked_by,
                   current_state_version_id, created_at
            FROM workspaces
            WHERE workspace_id = ?
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_workspaces(
        &self,
        organization: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkspaceRecord>, EngineError> {
        let records = sqlx::query_as::<_, WorkspaceRecord>(
            r#"
            SELECT workspace_id, organization, name, execution_mode, locked_by,
                   current_state_version_id, created_at
            FROM workspaces
            WHERE (?1 IS NULL OR organization = ?1)
            ORDER BY organization, name
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(organization)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_workspaces(&self, organization: Option<&str>) -> Result<i64, EngineError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM workspaces
            WHERE (?1 IS NULL OR organization = ?1)
            "#,
        )
        .bind(organization)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn delete_workspace(&self, workspace_id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM workspaces WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn acquire_lock(&self, workspace_id: &str, holder: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE workspaces
            SET locked_by = ?1
            WHERE workspace_id = ?2
              AND locked_by IS NULL
            "#,
        )
        .bind(holder)
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lock(&self, workspace_id: &str, holder: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE workspaces
            SET locked_by = NULL
            WHERE workspace_id = ?1
              AND locked_by = ?2
            "#,
        )
        .bind(workspace_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn force_release_lock(&self, workspace_id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE workspaces
            SET locked_by = NULL
            WHERE workspace_id = ?1
              AND locked_by IS NOT NULL
            "#,
        )
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_workspace_permission(
        &self,
        workspace_id: &str,
        team_id: &str,
        role: &str,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO workspace_permissions (workspace_id, team_id, role)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (workspace_id, team_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(workspace_id)
        .bind(team_id)
        .bind(role)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unset_workspace_permission(
        &self,
        workspace_id: &str,
        team_id: &str,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            DELETE FROM workspace_permissions
            WHERE workspace_id = ?1 AND team_id = ?2
            "#,
        )
        .bind(workspace_id)
        .bind(team_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_workspace_permissions(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<WorkspacePermissionRecord>, EngineError> {
        let records = sqlx::query_as::<_, WorkspacePermissionRecord>(
            r#"
            SELECT workspace_id, team_id, role
            FROM workspace_permissions
            WHERE workspace_id = ?
            ORDER BY team_id
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn create_run(&self, run: &RunRecord) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO runs
                (run_id, workspace_id, configuration_version_id, status, source,
                 plan_only, auto_apply, cancelable, cancel_signaled_at,
                 plan_additions, plan_changes, plan_destructions,
                 apply_additions, apply_changes, apply_destructions,
                 error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.workspace_id)
        .bind(&run.configuration_version_id)
        .bind(&run.status)
        .bind(&run.source)
        .bind(run.plan_only)
        .bind(run.auto_apply)
        .bind(run.cancelable)
        .bind(run.cancel_signaled_at)
        .bind(run.plan_additions)
        .bind(run.plan_changes)
        .bind(run.plan_destructions)
        .bind(run.apply_additions)
        .bind(run.apply_changes)
        .bind(run.apply_destructions)
        .bind(&run.error_message)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO run_status_timestamps (run_id, status, timestamp)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.status)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, EngineError> {
        let record = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT run_id, workspace_id, configuration_version_id, status, source,
                   plan_only, auto_apply, cancelable, cancel_signaled_at,
                   plan_additions, plan_changes, plan_destructions,
                   apply_additions, apply_changes, apply_destructions,
                   error_message, created_at
            FROM runs
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_runs(
        &self,
        workspace_id: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RunRecord>, EngineError> {
        let records = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT run_id, workspace_id, configuration_version_id, status, source,
                   plan_only, auto_apply, cancelable, cancel_signaled_at,
                   plan_additions, plan_changes, plan_destructions,
                   apply_additions, apply_changes, apply_destructions,
                   error_message, created_at
            FROM runs
            WHERE (?1 IS NULL OR workspace_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(workspace_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_runs(
        &self,
        workspace_id: Option<&str>,
        status: Option<&str>,
    ) -> Result<i64, EngineError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM runs
            WHERE (?1 IS NULL OR workspace_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            "#,
        )
        .bind(workspace_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn transition_run(
        &self,
        run_id: &str,
        from: &str,
        to: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?1
            WHERE run_id = ?2
              AND status = ?3
            "#,
        )
        .bind(to)
        .bind(run_id)
        .bind(from)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO run_status_timestamps (run_id, status, timestamp)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(run_id)
        .bind(to)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn record_plan_report(
        &self,
        run_id: &str,
        report: &ResourceReport,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET plan_additions = ?1, plan_changes = ?2, plan_destructions = ?3
            WHERE run_id = ?4
            "#,
        )
        .bind(report.additions)
        .bind(report.changes)
        .bind(report.destructions)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_apply_report(
        &self,
        run_id: &str,
        report: &ResourceReport,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET apply_additions = ?1, apply_changes = ?2, apply_destructions = ?3
            WHERE run_id = ?4
            "#,
        )
        .bind(report.additions)
        .bind(report.changes)
        .bind(report.destructions)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_run_error(&self, run_id: &str, message: &str) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET error_message = ?1
            WHERE run_id = ?2
            "#,
        )
        .bind(message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn signal_cancel(&self, run_id: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET cancel_signaled_at = COALESCE(cancel_signaled_at, ?1)
            WHERE run_id = ?2
            "#,
        )
        .bind(at)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_cancelable(&self, run_id: &str, cancelable: bool) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET cancelable = ?1
            WHERE run_id = ?2
            "#,
        )
        .bind(cancelable)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn oldest_queued_run(
        &self,
        workspace_id: &str,
    ) -> Result<Option<RunRecord>, EngineError> {
        let record = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT run_id, workspace_id, configuration_version_id, status, source,
                   plan_only, auto_apply, cancelable, cancel_signaled_at,
                   plan_additions, plan_changes, plan_destructions,
                   apply_additions, apply_changes, apply_destructions,
                   error_message, created_at
            FROM runs
            WHERE workspace_id = ?
              AND status = 'queued'
            ORDER BY created_at, run_id
            LIMIT 1
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn queued_position(
        &self,
        workspace_id: &str,
        run_id: &str,
    ) -> Result<i64, EngineError> {
        let position: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM runs
            WHERE workspace_id = ?1
              AND status = 'queued'
              AND created_at <= (SELECT created_at FROM runs WHERE run_id = ?2)
            "#,
        )
        .bind(workspace_id)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(position)
    }

    async fn count_active_runs(&self, workspace_id: &str) -> Result<i64, EngineError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM runs
            WHERE workspace_id = ?
              AND status IN ('planning', 'planned', 'applying')
            "#,
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_run_timestamps(
        &self,
        run_id: &str,
    ) -> Result<Vec<RunStatusTimestampRecord>, EngineError> {
        let records = sqlx::query_as::<_, RunStatusTimestampRecord>(
            r#"
            SELECT run_id, status, timestamp
            FROM run_status_timestamps
            WHERE run_id = ?
            ORDER BY timestamp, status
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_state_version(
        &self,
        version: &StateVersionRecord,
        outputs: &[OutputRecord],
        expected_current: Option<&str>,
    ) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO state_versions
                (state_version_id, workspace_id, serial, digest, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.state_version_id)
        .bind(&version.workspace_id)
        .bind(version.serial)
        .bind(&version.digest)
        .bind(&version.state)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await?;

        for output in outputs {
            sqlx::query(
                r#"
                INSERT INTO state_version_outputs
                    (output_id, state_version_id, name, output_type, value, sensitive)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&output.output_id)
            .bind(&output.state_version_id)
            .bind(&output.name)
            .bind(&output.output_type)
            .bind(&output.value)
            .bind(output.sensitive)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE workspaces
            SET current_state_version_id = ?1
            WHERE workspace_id = ?2
              AND current_state_version_id IS ?3
            "#,
        )
        .bind(&version.state_version_id)
        .bind(&version.workspace_id)
        .bind(expected_current)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;

        Ok(true)
    }

    async fn get_state_version(
        &self,
        state_version_id: &str,
    ) -> Result<Option<StateVersionRecord>, EngineError> {
        let record = sqlx::query_as::<_, StateVersionRecord>(
            r#"
            SELECT state_version_id, workspace_id, serial, digest, state, created_at
            FROM state_versions
            WHERE state_version_id = ?
            "#,
        )
        .bind(state_version_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_current_state_version(
        &self,
        workspace_id: &str,
    ) -> Result<Option<StateVersionRecord>, EngineError> {
        let record = sqlx::query_as::<_, StateVersionRecord>(
            r#"
            SELECT sv.state_version_id, sv.workspace_id, sv.serial, sv.digest,
                   sv.state, sv.created_at
            FROM state_versions sv
            JOIN workspaces w ON w.current_state_version_id = sv.state_version_id
            WHERE w.workspace_id = ?
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_state_versions(
        &self,
        workspace_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StateVersionRecord>, EngineError> {
        let records = sqlx::query_as::<_, StateVersionRecord>(
            r#"
            SELECT state_version_id, workspace_id, serial, digest, state, created_at
            FROM state_versions
            WHERE workspace_id = ?1
            ORDER BY created_at DESC, serial DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(workspace_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_state_versions(&self, workspace_id: &str) -> Result<i64, EngineError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM state_versions WHERE workspace_id = ?
            "#,
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn delete_state_version(&self, state_version_id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            DELETE FROM state_versions
            WHERE state_version_id = ?1
              AND NOT EXISTS (
                  SELECT 1 FROM workspaces
                  WHERE current_state_version_id = ?1
              )
            "#,
        )
        .bind(state_version_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_outputs(
        &self,
        state_version_id: &str,
    ) -> Result<Vec<OutputRecord>, EngineError> {
        let records = sqlx::query_as::<_, OutputRecord>(
            r#"
            SELECT output_id, state_version_id, name, output_type, value, sensitive
            FROM state_version_outputs
            WHERE state_version_id = ?
            ORDER BY name
            "#,
        )
        .bind(state_version_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn get_output(&self, output_id: &str) -> Result<Option<OutputRecord>, EngineError> {
        let record = sqlx::query_as::<_, OutputRecord>(
            r#"
            SELECT output_id, state_version_id, name, output_type, value, sensitive
            FROM state_version_outputs
            WHERE output_id = ?
            "#,
        )
        .bind(output_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn health_check_db(&self) -> Result<bool, EngineError> {
        let result: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(result == 1)
    }
}
