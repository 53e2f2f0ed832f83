// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle domain types.
//!
//! A run is one plan/apply execution attempt against a workspace. Its status
//! moves through a fixed state machine:
//!
//! ```text
//!                  ┌─────────┐
//!                  │ PENDING │
//!                  └────┬────┘
//!            lock free  │  lock held
//!          ┌────────────┴───────────┐
//!          ▼                        ▼
//!     ┌──────────┐             ┌────────┐
//!     │ PLANNING │◄────────────│ QUEUED │
//!     └────┬─────┘   promote   └────────┘
//!          │ plan done
//!          ▼
//!     ┌─────────┐  apply/auto-apply  ┌──────────┐
//!     │ PLANNED │───────────────────►│ APPLYING │
//!     └────┬────┘                    └────┬─────┘
//!          │ discard                      │ apply done
//!          ▼                              ▼
//!     ┌───────────┐                 ┌─────────┐
//!     │ DISCARDED │                 │ APPLIED │
//!     └───────────┘                 └─────────┘
//! ```
//!
//! Plan failure and apply failure lead to ERRORED; cancellation leads to
//! CANCELED from any non-terminal status that permits it. Plan-only runs
//! stop at PLANNED.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a run within its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet scheduled.
    Pending,
    /// Waiting behind another run for the workspace lock.
    Queued,
    /// Plan phase in progress.
    Planning,
    /// Plan finished; awaiting apply confirmation (or terminal if plan-only).
    Planned,
    /// Apply phase in progress.
    Applying,
    /// Apply finished successfully.
    Applied,
    /// Abandoned without applying.
    Discarded,
    /// A phase failed.
    Errored,
    /// Canceled before completion.
    Canceled,
}

impl RunStatus {
    /// Stable string form, used as the persisted status column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Planning => "planning",
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Discarded => "discarded",
            Self::Errored => "errored",
            Self::Canceled => "canceled",
        }
    }

    /// Whether this status ends the run for every run kind.
    ///
    /// `Planned` additionally terminates plan-only runs; that depends on the
    /// run, not the status, so it is decided where the run record is at hand.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Applied | Self::Discarded | Self::Errored | Self::Canceled
        )
    }

    /// Whether a run in this status counts against the one-active-run limit.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Planning | Self::Planned | Self::Applying)
    }

    /// Whether a run in this status holds the workspace lock.
    ///
    /// The lock is taken when a run leaves `Pending`/`Queued` for `Planning`
    /// and released on any terminal outcome.
    pub fn holds_lock(&self) -> bool {
        self.is_active()
    }

    /// Whether a run may be discarded from this status.
    pub fn is_discardable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Planned)
    }

    /// Whether a run may be canceled from this status without consulting the
    /// apply-phase collaborator. Cancellation mid-apply additionally requires
    /// the run to still be cancelable.
    pub fn is_directly_cancelable(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Queued | Self::Planning | Self::Planned
        )
    }

    /// Whether the state machine permits moving from this status to `to`.
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        use RunStatus::*;
        match (self, to) {
            (Pending, Queued) | (Pending, Planning) => true,
            (Pending, Canceled) | (Pending, Discarded) => true,
            (Queued, Planning) => true,
            (Queued, Canceled) | (Queued, Discarded) => true,
            (Planning, Planned) | (Planning, Errored) | (Planning, Canceled) => true,
            (Planned, Applying) | (Planned, Discarded) | (Planned, Canceled) => true,
            (Applying, Applied) | (Applying, Errored) | (Applying, Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "planning" => Ok(Self::Planning),
            "planned" => Ok(Self::Planned),
            "applying" => Ok(Self::Applying),
            "applied" => Ok(Self::Applied),
            "discarded" => Ok(Self::Discarded),
            "errored" => Ok(Self::Errored),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// The two phases of a run, executed by the external phase collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Compute the resource diff without touching infrastructure.
    Plan,
    /// Execute the planned diff against real infrastructure.
    Apply,
}

impl Phase {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource diff counts reported by a finished phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    /// Resources to be created (plan) or created (apply).
    pub additions: i64,
    /// Resources to be changed or changed.
    pub changes: i64,
    /// Resources to be destroyed or destroyed.
    pub destructions: i64,
}

impl ResourceReport {
    /// Whether the report describes any change at all.
    pub fn has_changes(&self) -> bool {
        self.additions > 0 || self.changes > 0 || self.destructions > 0
    }
}

/// What triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    /// Started by a user through the UI.
    Ui,
    /// Started through the API.
    Api,
    /// Started by a VCS webhook.
    Webhook,
}

impl RunSource {
    /// Stable string form, used as the persisted source column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Api => "api",
            Self::Webhook => "webhook",
        }
    }
}

impl FromStr for RunSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ui" => Ok(Self::Ui),
            "api" => Ok(Self::Api),
            "webhook" => Ok(Self::Webhook),
            other => Err(format!("unknown run source: {other}")),
        }
    }
}

/// Options for creating a run.
#[derive(Debug, Clone)]
pub struct CreateRunOptions {
    /// Workspace the run targets.
    pub workspace_id: String,
    /// Configuration version to plan and apply.
    pub configuration_version_id: String,
    /// What triggered the run.
    pub source: RunSource,
    /// Stop after the plan phase.
    pub plan_only: bool,
    /// Start the apply phase automatically when the plan finishes.
    pub auto_apply: bool,
}
