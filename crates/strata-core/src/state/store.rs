// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The state version store.
//!
//! Owns the authoritative history of state snapshots per workspace:
//! creation with serial ordering checks, current-pointer maintenance,
//! rollback, and output extraction. Creation requires prerequisite checks
//! against the workspace's current version, so everything funnels through
//! [`StateVersionStore::create`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::ids;
use crate::persistence::{OutputRecord, Persistence, StateVersionRecord};
use crate::state::{self, StateFile};

/// Options for creating a state version.
#[derive(Debug, Clone)]
pub struct CreateVersionOptions {
    /// Workspace the version belongs to.
    pub workspace_id: String,
    /// Raw state payload.
    pub state: Vec<u8>,
    /// Explicit serial; takes precedence over the serial embedded in the
    /// payload when provided.
    pub serial: Option<i64>,
}

/// Creates, retrieves, and rolls back state versions.
pub struct StateVersionStore {
    persistence: Arc<dyn Persistence>,
    events: Arc<dyn EventSink>,
}

impl StateVersionStore {
    /// Create a store over the given persistence and event sink.
    pub fn new(persistence: Arc<dyn Persistence>, events: Arc<dyn EventSink>) -> Self {
        Self {
            persistence,
            events,
        }
    }

    /// Create a state version and make it the workspace's current version.
    ///
    /// The submitted serial must be greater than or equal to the current
    /// serial (absent history counts as -1). Submitting the current serial
    /// again is allowed only for byte-identical content, in which case the
    /// existing version is returned and no row is created.
    ///
    /// # Errors
    ///
    /// - [`EngineError::MalformedStatePayload`] when the payload does not parse
    /// - [`EngineError::SerialConflict`] when the serial is below current
    /// - [`EngineError::DigestMismatch`] when the serial equals current but
    ///   the content differs
    /// - [`EngineError::LockContention`] when a concurrent writer moved the
    ///   current pointer first; the operation is safe to retry
    pub async fn create(
        &self,
        opts: CreateVersionOptions,
    ) -> Result<StateVersionRecord, EngineError> {
        if self
            .persistence
            .get_workspace(&opts.workspace_id)
            .await?
            .is_none()
        {
            return Err(EngineError::NotFound {
                kind: "workspace",
                id: opts.workspace_id,
            });
        }

        let file = StateFile::parse(&opts.state)?;

        // An explicit serial takes precedence over the one embedded in the
        // payload, matching the long-standing client behaviour.
        let serial = opts.serial.unwrap_or(file.serial);
        if serial < 0 {
            return Err(EngineError::Validation {
                field: "serial".to_string(),
                message: format!("must be non-negative, got {serial}"),
            });
        }

        let current = self
            .persistence
            .get_current_state_version(&opts.workspace_id)
            .await?;
        // First version for the workspace: treat current serial as -1 so any
        // non-negative submission passes the ordering check.
        let current_serial = current.as_ref().map(|c| c.serial).unwrap_or(-1);

        if serial < current_serial {
            return Err(EngineError::SerialConflict {
                submitted: serial,
                current: current_serial,
            });
        }

        let digest = state::digest(&opts.state);
        if let Some(current) = &current
            && serial == current.serial
        {
            if digest != current.digest {
                return Err(EngineError::DigestMismatch {
                    serial,
                    submitted: digest,
                    current: current.digest.clone(),
                });
            }
            // Idempotent re-submission of identical state.
            debug!(
                workspace_id = %opts.workspace_id,
                serial,
                "Identical state re-submitted, returning current version"
            );
            return Ok(current.clone());
        }

        let (version, outputs) =
            new_version(&opts.workspace_id, opts.state, serial, digest, &file)?;
        let expected_current = current.map(|c| c.state_version_id);
        self.persist_current(version, outputs, expected_current)
            .await
    }

    /// Restore a historical version's content as the new current version.
    ///
    /// The target's payload and outputs are duplicated under a fresh
    /// identity; the clone carries the snapshot's own serial. Rollback is
    /// the one deliberate exception to serial ordering: it appends a new
    /// head pointing at old content without renumbering history.
    pub async fn rollback(
        &self,
        workspace_id: &str,
        state_version_id: &str,
    ) -> Result<StateVersionRecord, EngineError> {
        let target = self
            .persistence
            .get_state_version(state_version_id)
            .await?
            .filter(|v| v.workspace_id == workspace_id)
            .ok_or_else(|| EngineError::NotFound {
                kind: "state version",
                id: state_version_id.to_string(),
            })?;

        let file = StateFile::parse(&target.state)?;
        let (version, outputs) = new_version(
            workspace_id,
            target.state.clone(),
            target.serial,
            target.digest.clone(),
            &file,
        )?;

        let expected_current = self
            .persistence
            .get_current_state_version(workspace_id)
            .await?
            .map(|c| c.state_version_id);

        info!(
            workspace_id,
            target = %target.state_version_id,
            clone = %version.state_version_id,
            serial = version.serial,
            "Rolling back state"
        );
        self.persist_current(version, outputs, expected_current)
            .await
    }

    /// Fetch one version by ID.
    pub async fn get(&self, state_version_id: &str) -> Result<StateVersionRecord, EngineError> {
        self.persistence
            .get_state_version(state_version_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "state version",
                id: state_version_id.to_string(),
            })
    }

    /// Fetch a workspace's current version.
    pub async fn get_current(
        &self,
        workspace_id: &str,
    ) -> Result<StateVersionRecord, EngineError> {
        self.persistence
            .get_current_state_version(workspace_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "state version",
                id: format!("current for {workspace_id}"),
            })
    }

    /// List a workspace's versions, newest first.
    pub async fn list(
        &self,
        workspace_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StateVersionRecord>, EngineError> {
        self.persistence
            .list_state_versions(workspace_id, limit, offset)
            .await
    }

    /// Delete a historical version.
    ///
    /// Deleting the current version is a caller error; repoint current via
    /// rollback first.
    pub async fn delete(&self, state_version_id: &str) -> Result<(), EngineError> {
        let version = self.get(state_version_id).await?;

        let workspace = self.persistence.get_workspace(&version.workspace_id).await?;
        if let Some(workspace) = workspace
            && workspace.current_state_version_id.as_deref() == Some(state_version_id)
        {
            return Err(EngineError::CannotDeleteCurrentVersion {
                state_version_id: state_version_id.to_string(),
            });
        }

        // The delete itself is guarded against the version having become
        // current between the check and the statement.
        if !self.persistence.delete_state_version(state_version_id).await? {
            return Err(EngineError::CannotDeleteCurrentVersion {
                state_version_id: state_version_id.to_string(),
            });
        }
        Ok(())
    }

    async fn persist_current(
        &self,
        version: StateVersionRecord,
        outputs: Vec<OutputRecord>,
        expected_current: Option<String>,
    ) -> Result<StateVersionRecord, EngineError> {
        let inserted = self
            .persistence
            .insert_state_version(&version, &outputs, expected_current.as_deref())
            .await?;
        if !inserted {
            return Err(EngineError::LockContention {
                workspace_id: version.workspace_id,
            });
        }

        self.events
            .publish(Event::state_version_created(
                &version.workspace_id,
                &version.state_version_id,
                version.serial,
                version.created_at,
            ))
            .await;

        Ok(version)
    }
}

/// Construct a version record and its outputs from a parsed payload.
fn new_version(
    workspace_id: &str,
    state: Vec<u8>,
    serial: i64,
    digest: String,
    file: &StateFile,
) -> Result<(StateVersionRecord, Vec<OutputRecord>), EngineError> {
    let version = StateVersionRecord {
        state_version_id: ids::new_id(ids::STATE_VERSION_PREFIX),
        workspace_id: workspace_id.to_string(),
        serial,
        digest,
        state,
        created_at: Utc::now(),
    };

    let mut outputs = Vec::with_capacity(file.outputs.len());
    for (name, output) in &file.outputs {
        outputs.push(OutputRecord {
            output_id: ids::new_id(ids::OUTPUT_PREFIX),
            state_version_id: version.state_version_id.clone(),
            name: name.clone(),
            output_type: output.type_tag().to_string(),
            value: serde_json::to_vec(&output.value)?,
            sensitive: output.sensitive,
        });
    }

    Ok((version, outputs))
}
