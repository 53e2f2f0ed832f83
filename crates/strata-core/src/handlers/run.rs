// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle handlers.
//!
//! User-facing operations (create, apply, discard, cancel) authorize the
//! calling subject against the workspace's policy. The phase-completion
//! surface (`plan_completed`, `phase_errored`, `complete_apply`,
//! `report_point_of_no_return`) is driven by the phase execution
//! collaborator; completion signals for a phase the run has already left
//! are ignored, not errored, so duplicate delivery is harmless.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::events::Event;
use crate::ids;
use crate::persistence::{Persistence, RunRecord, RunStatusTimestampRecord, StateVersionRecord};
use crate::rbac::{AccessRequest, Action, Subject};
use crate::run::{CreateRunOptions, Phase, ResourceReport, RunStatus};
use crate::state::CreateVersionOptions;

use super::HandlerState;

/// A freshly created run and, when queued, its queue position.
#[derive(Debug, Clone)]
pub struct CreatedRun {
    /// The run as persisted after scheduling.
    pub run: RunRecord,
    /// 1-based position in the workspace queue; `None` when the run
    /// activated immediately.
    pub position: Option<i64>,
}

/// Create a run and hand it to the scheduler.
///
/// The run activates immediately when the workspace is idle; otherwise it
/// is queued FIFO behind the runs ahead of it.
#[instrument(skip(state, subject, opts), fields(workspace_id = %opts.workspace_id))]
pub async fn create_run(
    state: &HandlerState,
    subject: &Subject,
    opts: CreateRunOptions,
) -> Result<CreatedRun, EngineError> {
    let (_, policy) = state.workspace_policy(&opts.workspace_id).await?;
    state.authorize(subject, Action::CreateRun, &AccessRequest::Workspace(&policy))?;

    if opts.configuration_version_id.is_empty() {
        return Err(EngineError::Validation {
            field: "configuration_version_id".to_string(),
            message: "is required".to_string(),
        });
    }

    let run = RunRecord {
        run_id: ids::new_id(ids::RUN_PREFIX),
        workspace_id: opts.workspace_id.clone(),
        configuration_version_id: opts.configuration_version_id.clone(),
        status: RunStatus::Pending.as_str().to_string(),
        source: opts.source.as_str().to_string(),
        plan_only: opts.plan_only,
        auto_apply: opts.auto_apply,
        cancelable: true,
        cancel_signaled_at: None,
        plan_additions: None,
        plan_changes: None,
        plan_destructions: None,
        apply_additions: None,
        apply_changes: None,
        apply_destructions: None,
        error_message: None,
        created_at: Utc::now(),
    };
    state.persistence.create_run(&run).await?;

    let (status, position) = state.scheduler().start_or_enqueue(&run).await?;
    if status == RunStatus::Planning {
        state
            .dispatcher
            .dispatch(&run.run_id, Phase::Plan, &run.configuration_version_id)
            .await?;
    }

    let run = fetch_run(state, &run.run_id).await?;
    info!(run_id = %run.run_id, status = %run.status, "Run created");
    Ok(CreatedRun { run, position })
}

/// Fetch one run.
pub async fn get_run(
    state: &HandlerState,
    subject: &Subject,
    run_id: &str,
) -> Result<RunRecord, EngineError> {
    let run = fetch_run(state, run_id).await?;
    let (_, policy) = state.workspace_policy(&run.workspace_id).await?;
    state.authorize(subject, Action::GetRun, &AccessRequest::Workspace(&policy))?;
    Ok(run)
}

/// List a workspace's runs, newest first.
pub async fn list_runs(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
    limit: Option<i64>,
    offset: i64,
) -> Result<Vec<RunRecord>, EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(subject, Action::ListRuns, &AccessRequest::Workspace(&policy))?;

    let limit = limit.unwrap_or(state.config.default_page_size);
    state
        .persistence
        .list_runs(Some(workspace_id), None, limit, offset)
        .await
}

/// All recorded status transitions for a run, oldest first.
pub async fn run_timeline(
    state: &HandlerState,
    subject: &Subject,
    run_id: &str,
) -> Result<Vec<RunStatusTimestampRecord>, EngineError> {
    let run = fetch_run(state, run_id).await?;
    let (_, policy) = state.workspace_policy(&run.workspace_id).await?;
    state.authorize(subject, Action::GetRun, &AccessRequest::Workspace(&policy))?;
    state.persistence.list_run_timestamps(run_id).await
}

/// Confirm a planned run for apply.
///
/// Requires the run to be `planned`, not plan-only, and still holding the
/// workspace lock.
#[instrument(skip(state, subject))]
pub async fn apply_run(
    state: &HandlerState,
    subject: &Subject,
    run_id: &str,
) -> Result<RunRecord, EngineError> {
    let run = fetch_run(state, run_id).await?;
    let (workspace, policy) = state.workspace_policy(&run.workspace_id).await?;
    state.authorize(subject, Action::ApplyRun, &AccessRequest::Workspace(&policy))?;

    let status = run.run_status()?;
    if status != RunStatus::Planned || run.plan_only {
        return Err(EngineError::InvalidTransition {
            run_id: run_id.to_string(),
            from: run.status.clone(),
            to: RunStatus::Applying.as_str().to_string(),
        });
    }

    // The lock was taken when the run started planning and must still be
    // ours; anything else means the workspace was force-unlocked.
    if workspace.locked_by.as_deref() != Some(run_id) {
        return Err(EngineError::LockContention {
            workspace_id: workspace.workspace_id,
        });
    }

    if !state
        .persistence
        .transition_run(run_id, "planned", "applying", Utc::now())
        .await?
    {
        let current = fetch_run(state, run_id).await?;
        return Err(EngineError::InvalidTransition {
            run_id: run_id.to_string(),
            from: current.status,
            to: RunStatus::Applying.as_str().to_string(),
        });
    }
    emit(state, &run, RunStatus::Planned, RunStatus::Applying).await;

    state
        .dispatcher
        .dispatch(run_id, Phase::Apply, &run.configuration_version_id)
        .await?;

    fetch_run(state, run_id).await
}

/// Abandon a run without applying it.
///
/// Allowed from `pending`, `queued`, and `planned` only.
#[instrument(skip(state, subject))]
pub async fn discard_run(
    state: &HandlerState,
    subject: &Subject,
    run_id: &str,
) -> Result<RunRecord, EngineError> {
    let run = fetch_run(state, run_id).await?;
    let (_, policy) = state.workspace_policy(&run.workspace_id).await?;
    state.authorize(subject, Action::DiscardRun, &AccessRequest::Workspace(&policy))?;

    let status = run.run_status()?;
    if !status.is_discardable() {
        return Err(EngineError::InvalidTransition {
            run_id: run_id.to_string(),
            from: run.status.clone(),
            to: RunStatus::Discarded.as_str().to_string(),
        });
    }

    if !state
        .persistence
        .transition_run(run_id, status.as_str(), "discarded", Utc::now())
        .await?
    {
        let current = fetch_run(state, run_id).await?;
        return Err(EngineError::InvalidTransition {
            run_id: run_id.to_string(),
            from: current.status,
            to: RunStatus::Discarded.as_str().to_string(),
        });
    }
    emit(state, &run, status, RunStatus::Discarded).await;
    info!(run_id, from = %status, "Run discarded");

    if status.holds_lock() {
        state
            .scheduler()
            .release_and_promote(&run.workspace_id, run_id)
            .await?;
    }

    fetch_run(state, run_id).await
}

/// Cancel a run.
///
/// Cancellation records intent and transitions the run; it never kills an
/// in-flight phase at the infrastructure level. Mid-apply cancellation is
/// refused once the collaborator has reported the point of no return.
#[instrument(skip(state, subject))]
pub async fn cancel_run(
    state: &HandlerState,
    subject: &Subject,
    run_id: &str,
) -> Result<RunRecord, EngineError> {
    let run = fetch_run(state, run_id).await?;
    let (_, policy) = state.workspace_policy(&run.workspace_id).await?;
    state.authorize(subject, Action::CancelRun, &AccessRequest::Workspace(&policy))?;

    let status = run.run_status()?;
    if status.is_terminal() {
        return Err(EngineError::InvalidTransition {
            run_id: run_id.to_string(),
            from: run.status.clone(),
            to: RunStatus::Canceled.as_str().to_string(),
        });
    }
    if status == RunStatus::Applying && !run.cancelable {
        return Err(EngineError::InvalidTransition {
            run_id: run_id.to_string(),
            from: run.status.clone(),
            to: RunStatus::Canceled.as_str().to_string(),
        });
    }

    state.persistence.signal_cancel(run_id, Utc::now()).await?;

    if !state
        .persistence
        .transition_run(run_id, status.as_str(), "canceled", Utc::now())
        .await?
    {
        let current = fetch_run(state, run_id).await?;
        return Err(EngineError::InvalidTransition {
            run_id: run_id.to_string(),
            from: current.status,
            to: RunStatus::Canceled.as_str().to_string(),
        });
    }
    emit(state, &run, status, RunStatus::Canceled).await;
    info!(run_id, from = %status, "Run canceled");

    if status == RunStatus::Planning || status == RunStatus::Applying {
        // The collaborator observes the signal and stops at its next safe
        // checkpoint; any completion it still reports is ignored.
        state.dispatcher.cancel(run_id).await?;
    }
    if status.holds_lock() {
        state
            .scheduler()
            .release_and_promote(&run.workspace_id, run_id)
            .await?;
    }

    fetch_run(state, run_id).await
}

/// Record a finished plan phase.
///
/// Returns `None` when the signal arrived for a run that already left
/// `planning` (duplicate delivery or a race with cancellation).
#[instrument(skip(state, report))]
pub async fn plan_completed(
    state: &HandlerState,
    run_id: &str,
    report: ResourceReport,
) -> Result<Option<RunRecord>, EngineError> {
    let run = fetch_run(state, run_id).await?;

    if !state
        .persistence
        .transition_run(run_id, "planning", "planned", Utc::now())
        .await?
    {
        debug!(run_id, status = %run.status, "Ignoring plan completion for run not in planning");
        return Ok(None);
    }

    state.persistence.record_plan_report(run_id, &report).await?;
    emit(state, &run, RunStatus::Planning, RunStatus::Planned).await;
    info!(
        run_id,
        additions = report.additions,
        changes = report.changes,
        destructions = report.destructions,
        "Plan finished"
    );

    if run.plan_only {
        // Plan-only runs terminate here; free the workspace for the next run.
        state
            .scheduler()
            .release_and_promote(&run.workspace_id, run_id)
            .await?;
    } else if run.auto_apply
        && state
            .persistence
            .transition_run(run_id, "planned", "applying", Utc::now())
            .await?
    {
        emit(state, &run, RunStatus::Planned, RunStatus::Applying).await;
        state
            .dispatcher
            .dispatch(run_id, Phase::Apply, &run.configuration_version_id)
            .await?;
    }

    Ok(Some(fetch_run(state, run_id).await?))
}

/// Record a failed phase; the run becomes terminal.
///
/// A signal for a phase the run has already left is ignored.
#[instrument(skip(state))]
pub async fn phase_errored(
    state: &HandlerState,
    run_id: &str,
    phase: Phase,
    reason: &str,
) -> Result<(), EngineError> {
    let run = fetch_run(state, run_id).await?;

    let from = match phase {
        Phase::Plan => RunStatus::Planning,
        Phase::Apply => RunStatus::Applying,
    };
    if !state
        .persistence
        .transition_run(run_id, from.as_str(), "errored", Utc::now())
        .await?
    {
        debug!(run_id, status = %run.status, "Ignoring phase failure for run not in {from}");
        return Ok(());
    }

    state.persistence.record_run_error(run_id, reason).await?;
    emit(state, &run, from, RunStatus::Errored).await;
    warn!(run_id, %phase, reason, "Phase failed");

    state
        .scheduler()
        .release_and_promote(&run.workspace_id, run_id)
        .await?;

    Ok(())
}

/// Record a successful apply and persist its output as a new state version.
///
/// System-triggered but still authorized; collaborators call this with
/// [`Subject::engine`]. Idempotent against retries: a run that is already
/// `applied` re-emits no events, and identical state re-submission creates
/// no duplicate version. A state write failure after a successful apply
/// leaves the run `applied` with a recorded warning; the infrastructure
/// change already happened and cannot be rolled back by the engine.
///
/// Returns `None` when the completion signal arrived for a run that is
/// terminal but not applied (canceled or errored); the signal is ignored.
#[instrument(skip(state, subject, state_bytes, report))]
pub async fn complete_apply(
    state: &HandlerState,
    subject: &Subject,
    run_id: &str,
    report: ResourceReport,
    state_bytes: Vec<u8>,
) -> Result<Option<StateVersionRecord>, EngineError> {
    let run = fetch_run(state, run_id).await?;
    let (_, policy) = state.workspace_policy(&run.workspace_id).await?;
    state.authorize(
        subject,
        Action::CreateStateVersion,
        &AccessRequest::Workspace(&policy),
    )?;

    if state
        .persistence
        .transition_run(run_id, "applying", "applied", Utc::now())
        .await?
    {
        state
            .persistence
            .record_apply_report(run_id, &report)
            .await?;
        emit(state, &run, RunStatus::Applying, RunStatus::Applied).await;
        info!(run_id, "Apply finished");

        state
            .scheduler()
            .release_and_promote(&run.workspace_id, run_id)
            .await?;
    } else {
        let current = fetch_run(state, run_id).await?;
        if current.run_status()? != RunStatus::Applied {
            debug!(run_id, status = %current.status, "Ignoring apply completion for terminal run");
            return Ok(None);
        }
        // Retried completion for an already-applied run: fall through to the
        // state write, which is idempotent for identical content.
    }

    let version = state
        .store()
        .create(CreateVersionOptions {
            workspace_id: run.workspace_id.clone(),
            state: state_bytes,
            serial: None,
        })
        .await
        .map_err(|e| {
            warn!(
                run_id,
                workspace_id = %run.workspace_id,
                error = %e,
                "State version creation failed after successful apply; run remains applied"
            );
            e
        })?;

    Ok(Some(version))
}

/// The apply-phase collaborator reports that infrastructure changes have
/// started and the run can no longer be safely canceled.
pub async fn report_point_of_no_return(
    state: &HandlerState,
    run_id: &str,
) -> Result<(), EngineError> {
    let run = fetch_run(state, run_id).await?;
    if run.run_status()? == RunStatus::Applying {
        state.persistence.set_cancelable(run_id, false).await?;
    } else {
        debug!(run_id, status = %run.status, "Ignoring point-of-no-return report");
    }
    Ok(())
}

async fn fetch_run(state: &HandlerState, run_id: &str) -> Result<RunRecord, EngineError> {
    state
        .persistence
        .get_run(run_id)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            kind: "run",
            id: run_id.to_string(),
        })
}

async fn emit(state: &HandlerState, run: &RunRecord, from: RunStatus, to: RunStatus) {
    state
        .events
        .publish(Event::run_status_changed(
            &run.run_id,
            &run.workspace_id,
            from,
            to,
            Utc::now(),
        ))
        .await;
}
