// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-workspace run scheduling.
//!
//! The scheduler serializes run execution: at most one run is active per
//! workspace, everything else waits in a FIFO queue ordered by creation
//! time. The workspace lock column is the single mutual-exclusion
//! primitive; it is taken with a guarded single-statement update, so
//! concurrent activation attempts cannot both win.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::persistence::{Persistence, RunRecord};
use crate::run::RunStatus;

/// Serializes run execution per workspace.
pub struct RunScheduler {
    persistence: Arc<dyn Persistence>,
    events: Arc<dyn EventSink>,
}

impl RunScheduler {
    /// Create a scheduler over the given persistence and event sink.
    pub fn new(persistence: Arc<dyn Persistence>, events: Arc<dyn EventSink>) -> Self {
        Self {
            persistence,
            events,
        }
    }

    /// Activate a freshly created pending run, or queue it.
    ///
    /// The run activates immediately only when no other run is queued ahead
    /// of it and the workspace lock is free. Returns the status the run
    /// ended in and, when queued, its 1-based queue position.
    pub async fn start_or_enqueue(
        &self,
        run: &RunRecord,
    ) -> Result<(RunStatus, Option<i64>), EngineError> {
        let queue_is_empty = self
            .persistence
            .oldest_queued_run(&run.workspace_id)
            .await?
            .is_none();

        if queue_is_empty
            && self
                .persistence
                .acquire_lock(&run.workspace_id, &run.run_id)
                .await?
        {
            if self
                .persistence
                .transition_run(&run.run_id, "pending", "planning", Utc::now())
                .await?
            {
                info!(run_id = %run.run_id, workspace_id = %run.workspace_id, "Run activated");
                self.emit(run, RunStatus::Pending, RunStatus::Planning).await;
                return Ok((RunStatus::Planning, None));
            }
            // The run left pending before we could activate it (canceled or
            // discarded between creation and scheduling). Give the lock back.
            self.persistence
                .release_lock(&run.workspace_id, &run.run_id)
                .await?;
            let status = match self.persistence.get_run(&run.run_id).await? {
                Some(current) => current.run_status()?,
                None => RunStatus::Canceled,
            };
            return Ok((status, None));
        }

        if self
            .persistence
            .transition_run(&run.run_id, "pending", "queued", Utc::now())
            .await?
        {
            self.emit(run, RunStatus::Pending, RunStatus::Queued).await;
        }
        let position = self
            .persistence
            .queued_position(&run.workspace_id, &run.run_id)
            .await?;
        info!(
            run_id = %run.run_id,
            workspace_id = %run.workspace_id,
            position,
            "Run queued"
        );
        Ok((RunStatus::Queued, Some(position)))
    }

    /// Release the lock held by a finished run and promote the next in line.
    ///
    /// Invoked on every terminal or discarded outcome. Returns the promoted
    /// run's ID, if any.
    pub async fn release_and_promote(
        &self,
        workspace_id: &str,
        run_id: &str,
    ) -> Result<Option<String>, EngineError> {
        self.persistence.release_lock(workspace_id, run_id).await?;
        self.promote_next(workspace_id).await
    }

    /// Promote the oldest queued run if the workspace lock is free.
    ///
    /// A queue head that was concurrently canceled or discarded is skipped
    /// and the next candidate tried. At most one caller wins the lock, so
    /// exactly one run is promoted even when termination races an enqueue.
    pub async fn promote_next(&self, workspace_id: &str) -> Result<Option<String>, EngineError> {
        loop {
            let Some(next) = self.persistence.oldest_queued_run(workspace_id).await? else {
                debug!(workspace_id, "No queued run to promote");
                return Ok(None);
            };

            if !self
                .persistence
                .acquire_lock(workspace_id, &next.run_id)
                .await?
            {
                // Someone else holds the lock; they promote when they release.
                debug!(workspace_id, "Workspace lock busy, leaving queue as is");
                return Ok(None);
            }

            if self
                .persistence
                .transition_run(&next.run_id, "queued", "planning", Utc::now())
                .await?
            {
                info!(run_id = %next.run_id, workspace_id, "Promoted queued run");
                self.emit(&next, RunStatus::Queued, RunStatus::Planning).await;
                return Ok(Some(next.run_id));
            }

            // The head left the queue while we were acquiring the lock.
            self.persistence
                .release_lock(workspace_id, &next.run_id)
                .await?;
        }
    }

    async fn emit(&self, run: &RunRecord, from: RunStatus, to: RunStatus) {
        self.events
            .publish(Event::run_status_changed(
                &run.run_id,
                &run.workspace_id,
                from,
                to,
                Utc::now(),
            ))
            .await;
    }
}
