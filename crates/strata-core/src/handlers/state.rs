// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State version handlers.
//!
//! Client-submitted state goes through an integrity gate before any
//! consistency check: when the caller supplies a digest it must match the
//! digest computed over the payload, otherwise the request fails with
//! `DIGEST_VERIFICATION_FAILED` before serial ordering is even looked at.

use tracing::instrument;

use crate::error::EngineError;
use crate::persistence::{OutputRecord, Persistence, StateVersionRecord};
use crate::rbac::{AccessRequest, Action, Subject};
use crate::state::{self, CreateVersionOptions};

use super::HandlerState;

/// A client request to submit a state version.
#[derive(Debug, Clone)]
pub struct CreateStateVersionOptions {
    /// Target workspace.
    pub workspace_id: String,
    /// Raw state payload.
    pub state: Vec<u8>,
    /// Explicit serial, taking precedence over the payload's embedded one.
    pub serial: Option<i64>,
    /// Caller-computed hex SHA-256 of the payload, verified before any
    /// ordering check when present.
    pub digest: Option<String>,
}

/// Submit a new state version for a workspace.
#[instrument(skip(state, subject, opts), fields(workspace_id = %opts.workspace_id))]
pub async fn create_state_version(
    state: &HandlerState,
    subject: &Subject,
    opts: CreateStateVersionOptions,
) -> Result<StateVersionRecord, EngineError> {
    let (_, policy) = state.workspace_policy(&opts.workspace_id).await?;
    state.authorize(
        subject,
        Action::CreateStateVersion,
        &AccessRequest::Workspace(&policy),
    )?;

    if opts.state.len() > state.config.max_state_bytes {
        return Err(EngineError::Validation {
            field: "state".to_string(),
            message: format!(
                "payload of {} bytes exceeds the {} byte limit",
                opts.state.len(),
                state.config.max_state_bytes
            ),
        });
    }

    // Integrity gate: a claimed digest must match the payload before serial
    // ordering is considered.
    if let Some(claimed) = &opts.digest {
        let computed = state::digest(&opts.state);
        if !claimed.eq_ignore_ascii_case(&computed) {
            return Err(EngineError::DigestVerificationFailed {
                claimed: claimed.clone(),
                computed,
            });
        }
    }

    state
        .store()
        .create(CreateVersionOptions {
            workspace_id: opts.workspace_id,
            state: opts.state,
            serial: opts.serial,
        })
        .await
}

/// Restore a historical version's content as the workspace's new current
/// version.
#[instrument(skip(state, subject))]
pub async fn rollback_state_version(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
    state_version_id: &str,
) -> Result<StateVersionRecord, EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(
        subject,
        Action::RollbackStateVersion,
        &AccessRequest::Workspace(&policy),
    )?;

    state.store().rollback(workspace_id, state_version_id).await
}

/// Fetch one state version.
pub async fn get_state_version(
    state: &HandlerState,
    subject: &Subject,
    state_version_id: &str,
) -> Result<StateVersionRecord, EngineError> {
    let version = state.store().get(state_version_id).await?;
    let (_, policy) = state.workspace_policy(&version.workspace_id).await?;
    state.authorize(
        subject,
        Action::GetStateVersion,
        &AccessRequest::Workspace(&policy),
    )?;
    Ok(version)
}

/// Fetch a workspace's current state version.
pub async fn get_current_state_version(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
) -> Result<StateVersionRecord, EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(
        subject,
        Action::GetStateVersion,
        &AccessRequest::Workspace(&policy),
    )?;
    state.store().get_current(workspace_id).await
}

/// List a workspace's state versions, newest first.
pub async fn list_state_versions(
    state: &HandlerState,
    subject: &Subject,
    workspace_id: &str,
    limit: Option<i64>,
    offset: i64,
) -> Result<Vec<StateVersionRecord>, EngineError> {
    let (_, policy) = state.workspace_policy(workspace_id).await?;
    state.authorize(
        subject,
        Action::ListStateVersions,
        &AccessRequest::Workspace(&policy),
    )?;

    let limit = limit.unwrap_or(state.config.default_page_size);
    state.store().list(workspace_id, limit, offset).await
}

/// Delete a historical state version.
///
/// The current version cannot be deleted; repoint current via rollback
/// first.
#[instrument(skip(state, subject))]
pub async fn delete_state_version(
    state: &HandlerState,
    subject: &Subject,
    state_version_id: &str,
) -> Result<(), EngineError> {
    let version = state.store().get(state_version_id).await?;
    let (_, policy) = state.workspace_policy(&version.workspace_id).await?;
    state.authorize(
        subject,
        Action::DeleteStateVersion,
        &AccessRequest::Workspace(&policy),
    )?;

    state.store().delete(state_version_id).await
}

/// Download a state version's raw payload.
pub async fn download_state(
    state: &HandlerState,
    subject: &Subject,
    state_version_id: &str,
) -> Result<Vec<u8>, EngineError> {
    let version = state.store().get(state_version_id).await?;
    let (_, policy) = state.workspace_policy(&version.workspace_id).await?;
    state.authorize(
        subject,
        Action::DownloadState,
        &AccessRequest::Workspace(&policy),
    )?;
    Ok(version.state)
}

/// List a state version's outputs.
pub async fn list_outputs(
    state: &HandlerState,
    subject: &Subject,
    state_version_id: &str,
) -> Result<Vec<OutputRecord>, EngineError> {
    let version = state.store().get(state_version_id).await?;
    let (_, policy) = state.workspace_policy(&version.workspace_id).await?;
    state.authorize(
        subject,
        Action::GetStateVersionOutput,
        &AccessRequest::Workspace(&policy),
    )?;
    state.persistence.list_outputs(state_version_id).await
}

/// Fetch one output by ID.
pub async fn get_output(
    state: &HandlerState,
    subject: &Subject,
    output_id: &str,
) -> Result<OutputRecord, EngineError> {
    let output = state
        .persistence
        .get_output(output_id)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            kind: "output",
            id: output_id.to_string(),
        })?;

    let version = state.store().get(&output.state_version_id).await?;
    let (_, policy) = state.workspace_policy(&version.workspace_id).await?;
    state.authorize(
        subject,
        Action::GetStateVersionOutput,
        &AccessRequest::Workspace(&policy),
    )?;
    Ok(output)
}
