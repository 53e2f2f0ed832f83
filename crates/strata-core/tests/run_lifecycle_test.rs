// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the run lifecycle state machine.

mod common;

use common::*;
use strata_core::handlers::run::{self, CreatedRun};
use strata_core::handlers::state;
use strata_core::persistence::Persistence;
use strata_core::rbac::Role;
use strata_core::run::{Phase, ResourceReport};

fn plan_report() -> ResourceReport {
    ResourceReport {
        additions: 3,
        changes: 1,
        destructions: 0,
    }
}

#[tokio::test]
async fn test_full_run_lifecycle() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    // 1. Creation on an idle workspace activates immediately.
    let CreatedRun { run, position } = ctx.create_run(&ws.workspace_id).await;
    assert_eq!(run.status, "planning");
    assert!(position.is_none());
    assert_eq!(
        ctx.dispatcher.dispatches(),
        vec![(run.run_id.clone(), Phase::Plan)]
    );

    // 2. The workspace lock is held by the run.
    let locked = ctx.persistence.get_workspace(&ws.workspace_id).await.unwrap().unwrap();
    assert_eq!(locked.locked_by.as_deref(), Some(run.run_id.as_str()));

    // 3. Plan completion records the diff and parks the run at planned.
    let planned = run::plan_completed(&ctx.state, &run.run_id, plan_report())
        .await
        .unwrap()
        .expect("Completion should apply");
    assert_eq!(planned.status, "planned");
    assert_eq!(planned.plan_report(), Some(plan_report()));

    // 4. Apply confirmation starts the apply phase.
    let applying = run::apply_run(&ctx.state, &admin(), &run.run_id).await.unwrap();
    assert_eq!(applying.status, "applying");
    assert_eq!(ctx.dispatcher.dispatches().len(), 2);

    // 5. Apply completion terminates the run and persists the state output.
    let version = run::complete_apply(
        &ctx.state,
        &admin(),
        &run.run_id,
        ResourceReport {
            additions: 3,
            changes: 1,
            destructions: 0,
        },
        state_payload(1, "applied-state"),
    )
    .await
    .unwrap()
    .expect("Completion should apply");
    assert_eq!(version.serial, 1);

    assert_eq!(ctx.run_status(&run.run_id).await, "applied");
    let current = state::get_current_state_version(&ctx.state, &admin(), &ws.workspace_id)
        .await
        .unwrap();
    assert_eq!(current.state_version_id, version.state_version_id);

    // 6. The lock is released on the terminal outcome.
    let unlocked = ctx.persistence.get_workspace(&ws.workspace_id).await.unwrap().unwrap();
    assert!(unlocked.locked_by.is_none());

    // 7. The timeline recorded every transition once.
    let timeline = run::run_timeline(&ctx.state, &admin(), &run.run_id).await.unwrap();
    let statuses: Vec<&str> = timeline.iter().map(|t| t.status.as_str()).collect();
    assert_eq!(
        statuses,
        vec!["pending", "planning", "planned", "applying", "applied"]
    );
}

#[tokio::test]
async fn test_second_run_queues_behind_active() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let first = ctx.create_run(&ws.workspace_id).await;
    assert_eq!(first.run.status, "planning");

    let second = ctx.create_run(&ws.workspace_id).await;
    assert_eq!(second.run.status, "queued");
    assert_eq!(second.position, Some(1));

    let third = ctx.create_run(&ws.workspace_id).await;
    assert_eq!(third.run.status, "queued");
    assert_eq!(third.position, Some(2));

    // Only the plan for the active run was dispatched.
    assert_eq!(ctx.dispatcher.dispatches().len(), 1);
}

#[tokio::test]
async fn test_terminal_run_promotes_queue_head() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let first = ctx.create_run(&ws.workspace_id).await;
    let second = ctx.create_run(&ws.workspace_id).await;
    assert_eq!(second.run.status, "queued");

    run::phase_errored(&ctx.state, &first.run.run_id, Phase::Plan, "plan exploded")
        .await
        .unwrap();

    assert_eq!(ctx.run_status(&first.run.run_id).await, "errored");
    assert_eq!(ctx.run_status(&second.run.run_id).await, "planning");

    let errored = ctx.persistence.get_run(&first.run.run_id).await.unwrap().unwrap();
    assert_eq!(errored.error_message.as_deref(), Some("plan exploded"));

    // The promoted run now holds the lock.
    let workspace = ctx.persistence.get_workspace(&ws.workspace_id).await.unwrap().unwrap();
    assert_eq!(workspace.locked_by.as_deref(), Some(second.run.run_id.as_str()));
}

#[tokio::test]
async fn test_plan_only_run_terminates_at_planned() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let plan_only = ctx.create_run_with(&ws.workspace_id, true, false).await;
    let queued = ctx.create_run(&ws.workspace_id).await;
    assert_eq!(queued.run.status, "queued");

    run::plan_completed(&ctx.state, &plan_only.run.run_id, plan_report())
        .await
        .unwrap();

    // The plan-only run stays planned and releases the workspace.
    assert_eq!(ctx.run_status(&plan_only.run.run_id).await, "planned");
    assert_eq!(ctx.run_status(&queued.run.run_id).await, "planning");

    // A plan-only run cannot be confirmed for apply.
    let err = run::apply_run(&ctx.state, &admin(), &plan_only.run.run_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_auto_apply_skips_confirmation() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run_with(&ws.workspace_id, false, true).await;
    run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();

    assert_eq!(ctx.run_status(&run.run.run_id).await, "applying");
    assert_eq!(
        ctx.dispatcher.dispatches(),
        vec![
            (run.run.run_id.clone(), Phase::Plan),
            (run.run.run_id.clone(), Phase::Apply),
        ]
    );
}

#[tokio::test]
async fn test_canceled_queued_run_never_activates() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let active = ctx.create_run(&ws.workspace_id).await;
    let queued = ctx.create_run(&ws.workspace_id).await;

    let canceled = run::cancel_run(&ctx.state, &admin(), &queued.run.run_id)
        .await
        .unwrap();
    assert_eq!(canceled.status, "canceled");

    // The active run finishing finds nothing to promote.
    run::phase_errored(&ctx.state, &active.run.run_id, Phase::Plan, "boom")
        .await
        .unwrap();
    assert_eq!(ctx.run_status(&queued.run.run_id).await, "canceled");

    let workspace = ctx.persistence.get_workspace(&ws.workspace_id).await.unwrap().unwrap();
    assert!(workspace.locked_by.is_none());
}

#[tokio::test]
async fn test_cancel_planning_run_promotes_next() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let active = ctx.create_run(&ws.workspace_id).await;
    let queued = ctx.create_run(&ws.workspace_id).await;

    run::cancel_run(&ctx.state, &admin(), &active.run.run_id)
        .await
        .unwrap();

    assert_eq!(ctx.run_status(&active.run.run_id).await, "canceled");
    assert_eq!(ctx.run_status(&queued.run.run_id).await, "planning");
    // Cancellation intent was forwarded to the collaborator.
    assert_eq!(ctx.dispatcher.cancels(), vec![active.run.run_id.clone()]);
}

#[tokio::test]
async fn test_cancel_refused_past_point_of_no_return() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run_with(&ws.workspace_id, false, true).await;
    run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();
    assert_eq!(ctx.run_status(&run.run.run_id).await, "applying");

    run::report_point_of_no_return(&ctx.state, &run.run.run_id)
        .await
        .unwrap();

    let err = run::cancel_run(&ctx.state, &admin(), &run.run.run_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
    assert_eq!(ctx.run_status(&run.run.run_id).await, "applying");
}

#[tokio::test]
async fn test_cancel_mid_apply_before_point_of_no_return() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run_with(&ws.workspace_id, false, true).await;
    run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();

    let canceled = run::cancel_run(&ctx.state, &admin(), &run.run.run_id)
        .await
        .unwrap();
    assert_eq!(canceled.status, "canceled");
    assert!(canceled.cancel_signaled_at.is_some());
}

#[tokio::test]
async fn test_late_plan_completion_for_canceled_run_is_ignored() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run(&ws.workspace_id).await;
    run::cancel_run(&ctx.state, &admin(), &run.run.run_id)
        .await
        .unwrap();

    // The collaborator reports completion after cancellation; the signal is
    // ignored, not errored.
    let result = run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(ctx.run_status(&run.run.run_id).await, "canceled");
    assert_eq!(ctx.status_change_events_to(&run.run.run_id, "planned"), 0);
}

#[tokio::test]
async fn test_duplicate_phase_signals_are_idempotent() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run(&ws.workspace_id).await;
    let first = run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();
    assert!(first.is_some());

    let second = run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();
    assert!(second.is_none(), "Duplicate delivery should be ignored");
    assert_eq!(ctx.status_change_events_to(&run.run.run_id, "planned"), 1);
}

#[tokio::test]
async fn test_complete_apply_retry_does_not_duplicate_events() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run_with(&ws.workspace_id, false, true).await;
    run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();

    let payload = state_payload(1, "applied-state");
    let first = run::complete_apply(
        &ctx.state,
        &admin(),
        &run.run.run_id,
        ResourceReport::default(),
        payload.clone(),
    )
    .await
    .unwrap()
    .unwrap();

    // Delivery retried with the same payload: the run is already applied,
    // no second completion event fires, and no duplicate version appears.
    let second = run::complete_apply(
        &ctx.state,
        &admin(),
        &run.run.run_id,
        ResourceReport::default(),
        payload,
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(second.state_version_id, first.state_version_id);
    assert_eq!(ctx.status_change_events_to(&run.run.run_id, "applied"), 1);
    let versions = state::list_state_versions(&ctx.state, &admin(), &ws.workspace_id, None, 0)
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn test_state_write_failure_leaves_run_applied() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run_with(&ws.workspace_id, false, true).await;
    run::plan_completed(&ctx.state, &run.run.run_id, plan_report())
        .await
        .unwrap();

    // The state write fails after a successful apply; the infrastructure
    // change already happened, so the run must stay applied.
    let err = run::complete_apply(
        &ctx.state,
        &admin(),
        &run.run.run_id,
        ResourceReport::default(),
        b"garbage payload".to_vec(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "MALFORMED_STATE_PAYLOAD");
    assert_eq!(ctx.run_status(&run.run.run_id).await, "applied");

    // A retried completion with a good payload writes the state without
    // re-emitting the completion event.
    let version = run::complete_apply(
        &ctx.state,
        &admin(),
        &run.run.run_id,
        ResourceReport::default(),
        state_payload(1, "recovered"),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(version.serial, 1);
    assert_eq!(ctx.status_change_events_to(&run.run.run_id, "applied"), 1);
}

#[tokio::test]
async fn test_discard_planned_run_promotes_next() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let first = ctx.create_run(&ws.workspace_id).await;
    let second = ctx.create_run(&ws.workspace_id).await;

    run::plan_completed(&ctx.state, &first.run.run_id, plan_report())
        .await
        .unwrap();
    let discarded = run::discard_run(&ctx.state, &admin(), &first.run.run_id)
        .await
        .unwrap();
    assert_eq!(discarded.status, "discarded");
    assert_eq!(ctx.run_status(&second.run.run_id).await, "planning");
}

#[tokio::test]
async fn test_discard_refused_mid_phase() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let run = ctx.create_run(&ws.workspace_id).await;
    assert_eq!(run.run.status, "planning");

    let err = run::discard_run(&ctx.state, &admin(), &run.run.run_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_forbidden_create_persists_no_run() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;
    ctx.grant(&ws.workspace_id, "team-readers", Role::Read).await;

    let err = strata_core::handlers::run::create_run(
        &ctx.state,
        &team_member("team-readers"),
        strata_core::run::CreateRunOptions {
            workspace_id: ws.workspace_id.clone(),
            configuration_version_id: "cv-test".to_string(),
            source: strata_core::run::RunSource::Api,
            plan_only: false,
            auto_apply: false,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    let count = ctx.persistence.count_runs(Some(&ws.workspace_id), None).await.unwrap();
    assert_eq!(count, 0, "Denied creation must not persist a run");
}

#[tokio::test]
async fn test_plan_role_can_create_but_not_apply() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;
    ctx.grant(&ws.workspace_id, "team-planners", Role::Plan).await;

    let planner = team_member("team-planners");
    let created = strata_core::handlers::run::create_run(
        &ctx.state,
        &planner,
        strata_core::run::CreateRunOptions {
            workspace_id: ws.workspace_id.clone(),
            configuration_version_id: "cv-test".to_string(),
            source: strata_core::run::RunSource::Ui,
            plan_only: false,
            auto_apply: false,
        },
    )
    .await
    .unwrap();

    run::plan_completed(&ctx.state, &created.run.run_id, plan_report())
        .await
        .unwrap();

    let err = run::apply_run(&ctx.state, &planner, &created.run.run_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");
}
