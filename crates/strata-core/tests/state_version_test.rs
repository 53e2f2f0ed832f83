// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for state version consistency.

mod common;

use common::*;
use strata_core::handlers::state::{self, CreateStateVersionOptions};
use strata_core::rbac::Role;
use strata_core::state::digest;

#[tokio::test]
async fn test_first_version_for_fresh_workspace() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let payload = state_payload(1, "d1");
    let version = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: payload.clone(),
            serial: None,
            digest: None,
        },
    )
    .await
    .expect("First submission should succeed");

    assert_eq!(version.serial, 1);
    assert_eq!(version.digest, digest(&payload));

    let current = state::get_current_state_version(&ctx.state, &admin(), &ws.workspace_id)
        .await
        .expect("Current version should exist");
    assert_eq!(current.state_version_id, version.state_version_id);
    assert_eq!(current.serial, 1);
}

#[tokio::test]
async fn test_identical_resubmission_is_idempotent() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let payload = state_payload(1, "d1");
    let first = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: payload.clone(),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let second = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: payload,
            serial: None,
            digest: None,
        },
    )
    .await
    .expect("Identical re-submission should succeed");

    // Same row, no duplicate serial.
    assert_eq!(second.state_version_id, first.state_version_id);
    let versions = state::list_state_versions(&ctx.state, &admin(), &ws.workspace_id, None, 0)
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn test_lower_serial_is_a_serial_conflict() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let err = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(0, "anything"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "SERIAL_CONFLICT");
}

#[tokio::test]
async fn test_equal_serial_with_different_content_is_a_digest_mismatch() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let err = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d2"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "DIGEST_MISMATCH");
}

#[tokio::test]
async fn test_claimed_digest_is_verified_before_serial_checks() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    // Serial 0 would be a conflict after a first version existed, but here
    // the claimed digest is wrong so verification must fail first, even on
    // a fresh workspace where the serial would be fine.
    let err = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: Some("0".repeat(64)),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "DIGEST_VERIFICATION_FAILED");

    // Nothing was written.
    let err = state::get_current_state_version(&ctx.state, &admin(), &ws.workspace_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_matching_claimed_digest_is_accepted() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let payload = state_payload(1, "d1");
    let version = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: payload.clone(),
            serial: None,
            digest: Some(digest(&payload)),
        },
    )
    .await
    .expect("Submission with a correct digest should succeed");
    assert_eq!(version.serial, 1);
}

#[tokio::test]
async fn test_explicit_serial_takes_precedence_over_payload() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    // Payload embeds serial 1 but the client says 5; the client wins.
    let version = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: Some(5),
            digest: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(version.serial, 5);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let err = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: b"this is not a state document".to_vec(),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "MALFORMED_STATE_PAYLOAD");
}

#[tokio::test]
async fn test_outputs_are_extracted_at_construction() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let version = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let outputs = state::list_outputs(&ctx.state, &admin(), &version.state_version_id)
        .await
        .unwrap();
    assert_eq!(outputs.len(), 3);

    let marker = outputs.iter().find(|o| o.name == "marker").unwrap();
    assert_eq!(marker.output_type, "string");
    assert!(!marker.sensitive);

    let password = outputs.iter().find(|o| o.name == "password").unwrap();
    assert!(password.sensitive);

    let replicas = outputs.iter().find(|o| o.name == "replica_count").unwrap();
    assert_eq!(replicas.output_type, "number");
    assert_eq!(replicas.value, b"3");
}

#[tokio::test]
async fn test_rollback_clones_content_under_fresh_identity() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let v1_payload = state_payload(1, "first");
    let v1 = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: v1_payload.clone(),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(2, "second"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let clone = state::rollback_state_version(
        &ctx.state,
        &admin(),
        &ws.workspace_id,
        &v1.state_version_id,
    )
    .await
    .expect("Rollback should succeed");

    // Fresh identity, same content and serial as the snapshot.
    assert_ne!(clone.state_version_id, v1.state_version_id);
    assert_eq!(clone.state, v1_payload);
    assert_eq!(clone.serial, v1.serial);
    assert_eq!(clone.digest, v1.digest);

    // Current points at the clone, not at the target.
    let current = state::get_current_state_version(&ctx.state, &admin(), &ws.workspace_id)
        .await
        .unwrap();
    assert_eq!(current.state_version_id, clone.state_version_id);

    // History now holds three versions; nothing was renumbered.
    let versions = state::list_state_versions(&ctx.state, &admin(), &ws.workspace_id, None, 0)
        .await
        .unwrap();
    assert_eq!(versions.len(), 3);

    // The clone's outputs were deep-copied under fresh identities.
    let original_outputs = state::list_outputs(&ctx.state, &admin(), &v1.state_version_id)
        .await
        .unwrap();
    let clone_outputs = state::list_outputs(&ctx.state, &admin(), &clone.state_version_id)
        .await
        .unwrap();
    assert_eq!(original_outputs.len(), clone_outputs.len());
    for output in &clone_outputs {
        assert!(
            original_outputs.iter().all(|o| o.output_id != output.output_id),
            "Cloned outputs must not share identity with the source"
        );
    }
}

#[tokio::test]
async fn test_rollback_to_foreign_version_is_not_found() {
    let ctx = TestContext::new().await;
    let ws_a = ctx.create_workspace("prod").await;
    let ws_b = ctx.create_workspace("staging").await;

    let version = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws_a.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let err = state::rollback_state_version(
        &ctx.state,
        &admin(),
        &ws_b.workspace_id,
        &version.state_version_id,
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_current_version_cannot_be_deleted() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let v1 = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();
    let v2 = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(2, "d2"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let err = state::delete_state_version(&ctx.state, &admin(), &v2.state_version_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CANNOT_DELETE_CURRENT_VERSION");

    // Historical versions delete fine, and deletion never moves current.
    state::delete_state_version(&ctx.state, &admin(), &v1.state_version_id)
        .await
        .expect("Deleting a historical version should succeed");
    let current = state::get_current_state_version(&ctx.state, &admin(), &ws.workspace_id)
        .await
        .unwrap();
    assert_eq!(current.state_version_id, v2.state_version_id);
}

#[tokio::test]
async fn test_download_returns_raw_payload() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    let payload = state_payload(1, "d1");
    let version = state::create_state_version(
        &ctx.state,
        &admin(),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: payload.clone(),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap();

    let bytes = state::download_state(&ctx.state, &admin(), &version.state_version_id)
        .await
        .unwrap();
    assert_eq!(bytes, payload);
}

#[tokio::test]
async fn test_state_write_requires_write_role() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;
    ctx.grant(&ws.workspace_id, "team-dev", Role::Plan).await;

    let err = state::create_state_version(
        &ctx.state,
        &team_member("team-dev"),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    ctx.grant(&ws.workspace_id, "team-dev", Role::Write).await;
    state::create_state_version(
        &ctx.state,
        &team_member("team-dev"),
        CreateStateVersionOptions {
            workspace_id: ws.workspace_id.clone(),
            state: state_payload(1, "d1"),
            serial: None,
            digest: None,
        },
    )
    .await
    .expect("Write role should allow state submission");
}

#[tokio::test]
async fn test_state_version_created_events_carry_serials() {
    let ctx = TestContext::new().await;
    let ws = ctx.create_workspace("prod").await;

    for serial in 1..=3 {
        state::create_state_version(
            &ctx.state,
            &admin(),
            CreateStateVersionOptions {
                workspace_id: ws.workspace_id.clone(),
                state: state_payload(serial, &format!("content-{serial}")),
                serial: None,
                digest: None,
            },
        )
        .await
        .unwrap();
    }

    let serials: Vec<i64> = ctx
        .sink
        .events()
        .iter()
        .filter_map(|event| match event {
            strata_core::events::Event::StateVersionCreated { serial, .. } => Some(*serial),
            _ => None,
        })
        .collect();
    assert_eq!(serials, vec![1, 2, 3]);
}
