// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prefixed resource identifiers.
//!
//! Every resource ID carries a short kind prefix (`ws-`, `run-`, `sv-`,
//! `wsout-`) so IDs are self-describing in logs and API payloads.

use uuid::Uuid;

/// Generate a new resource ID with the given kind prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// ID prefix for workspaces.
pub const WORKSPACE_PREFIX: &str = "ws";

/// ID prefix for runs.
pub const RUN_PREFIX: &str = "run";

/// ID prefix for state versions.
pub const STATE_VERSION_PREFIX: &str = "sv";

/// ID prefix for state version outputs.
pub const OUTPUT_PREFIX: &str = "wsout";
