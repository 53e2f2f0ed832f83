// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for strata-core.
//!
//! Provides a unified error type with stable machine-readable codes so
//! transport layers can map engine failures onto wire responses.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while orchestrating runs or writing state.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// The subject is not permitted to perform the action.
    Forbidden {
        /// The action that was denied.
        action: String,
        /// The subject the denial applies to.
        subject: String,
    },

    /// A referenced resource does not exist.
    NotFound {
        /// Resource kind (workspace, run, state version, output).
        kind: &'static str,
        /// The ID that was not found.
        id: String,
    },

    /// An illegal run status change was requested.
    InvalidTransition {
        /// The run ID.
        run_id: String,
        /// The status the run is currently in.
        from: String,
        /// The status that was requested.
        to: String,
    },

    /// The submitted state serial is lower than the workspace's current serial.
    SerialConflict {
        /// The serial that was submitted.
        submitted: i64,
        /// The workspace's current serial.
        current: i64,
    },

    /// Same serial as current but the content digest differs.
    DigestMismatch {
        /// The serial both versions share.
        serial: i64,
        /// Digest of the submitted payload.
        submitted: String,
        /// Digest of the current version.
        current: String,
    },

    /// The caller-supplied digest does not match the payload.
    DigestVerificationFailed {
        /// The digest the caller claimed.
        claimed: String,
        /// The digest computed over the payload.
        computed: String,
    },

    /// The state payload is not a parseable state document.
    MalformedStatePayload {
        /// Parse error details.
        reason: String,
    },

    /// The current state version cannot be deleted while still current.
    CannotDeleteCurrentVersion {
        /// The state version ID.
        state_version_id: String,
    },

    /// A concurrent writer moved the workspace's current pointer or lock.
    ///
    /// Transient: the enclosing operation is safe to retry.
    LockContention {
        /// The workspace ID the contention occurred on.
        workspace_id: String,
    },

    /// A plan or apply phase reported failure.
    PhaseExecutionFailed {
        /// The run ID.
        run_id: String,
        /// The phase that failed.
        phase: String,
        /// Failure details from the phase collaborator.
        reason: String,
    },

    /// Input validation failed.
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Persistence operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::SerialConflict { .. } => "SERIAL_CONFLICT",
            Self::DigestMismatch { .. } => "DIGEST_MISMATCH",
            Self::DigestVerificationFailed { .. } => "DIGEST_VERIFICATION_FAILED",
            Self::MalformedStatePayload { .. } => "MALFORMED_STATE_PAYLOAD",
            Self::CannotDeleteCurrentVersion { .. } => "CANNOT_DELETE_CURRENT_VERSION",
            Self::LockContention { .. } => "LOCK_CONTENTION",
            Self::PhaseExecutionFailed { .. } => "PHASE_EXECUTION_FAILED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether retrying the enclosing operation may succeed.
    ///
    /// Only lock contention qualifies; consistency violations like
    /// [`EngineError::SerialConflict`] indicate a genuine conflicting write
    /// that the caller must resolve.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden { action, subject } => {
                write!(f, "Subject '{}' is not allowed to {}", subject, action)
            }
            Self::NotFound { kind, id } => {
                write!(f, "{} '{}' not found", kind, id)
            }
            Self::InvalidTransition { run_id, from, to } => {
                write!(
                    f,
                    "Run '{}' cannot transition from '{}' to '{}'",
                    run_id, from, to
                )
            }
            Self::SerialConflict { submitted, current } => {
                write!(
                    f,
                    "Submitted serial {} is lower than the current serial {}",
                    submitted, current
                )
            }
            Self::DigestMismatch {
                serial,
                submitted,
                current,
            } => {
                write!(
                    f,
                    "State with serial {} already exists with digest {} but {} was submitted",
                    serial, current, submitted
                )
            }
            Self::DigestVerificationFailed { claimed, computed } => {
                write!(
                    f,
                    "Claimed digest {} does not match computed digest {}",
                    claimed, computed
                )
            }
            Self::MalformedStatePayload { reason } => {
                write!(f, "State payload is not a valid state document: {}", reason)
            }
            Self::CannotDeleteCurrentVersion { state_version_id } => {
                write!(
                    f,
                    "State version '{}' is the workspace's current version and cannot be deleted",
                    state_version_id
                )
            }
            Self::LockContention { workspace_id } => {
                write!(
                    f,
                    "Concurrent write detected on workspace '{}', retry the operation",
                    workspace_id
                )
            }
            Self::PhaseExecutionFailed {
                run_id,
                phase,
                reason,
            } => {
                write!(f, "Run '{}' {} phase failed: {}", run_id, phase, reason)
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::MalformedStatePayload {
            reason: err.to_string(),
        }
    }
}
