// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The phase execution collaborator interface.
//!
//! Plans and applies run outside the engine, in a worker process or agent.
//! The engine tells the collaborator when to start a phase and forwards
//! cancellation intent; the collaborator reports back through the run
//! handlers (`plan_completed`, `complete_apply`, `phase_errored`).

use async_trait::async_trait;

use crate::error::EngineError;
use crate::run::Phase;

/// Starts phases on the external execution collaborator.
#[async_trait]
pub trait PhaseDispatcher: Send + Sync {
    /// Ask the collaborator to execute a phase for a run.
    async fn dispatch(
        &self,
        run_id: &str,
        phase: Phase,
        configuration_version_id: &str,
    ) -> Result<(), EngineError>;

    /// Forward recorded cancellation intent to the collaborator.
    ///
    /// This never kills an in-flight phase; the collaborator observes the
    /// signal and stops at its next safe checkpoint.
    async fn cancel(&self, run_id: &str) -> Result<(), EngineError>;
}

/// Dispatcher that accepts every request and does nothing.
///
/// Useful for embedding and for tests that drive phase completion directly
/// through the run handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDispatcher;

#[async_trait]
impl PhaseDispatcher for NullDispatcher {
    async fn dispatch(
        &self,
        _run_id: &str,
        _phase: Phase,
        _configuration_version_id: &str,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    async fn cancel(&self, _run_id: &str) -> Result<(), EngineError> {
        Ok(())
    }
}
