// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Strata Core - Run Orchestration & State Consistency Engine
//!
//! This crate orchestrates plan/apply runs against declarative infrastructure
//! workspaces and keeps each workspace's remote state history strictly
//! consistent, persisting everything to PostgreSQL or SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         External Callers                                 │
//! │                  (HTTP/JSON API, CLI, VCS webhooks)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Orchestration Handlers                             │
//! │           authorize → validate → mutate → emit, per operation           │
//! └──────────┬────────────────────┬──────────────────────┬──────────────────┘
//!            │                    │                      │
//!            ▼                    ▼                      ▼
//! ┌───────────────────┐ ┌──────────────────┐  ┌─────────────────────────────┐
//! │   Policy Engine   │ │  Run Scheduler   │  │     State Version Store     │
//! │  (rbac, pure fn)  │ │ (FIFO + ws lock) │  │ (serials, digests, rollback)│
//! └───────────────────┘ └────────┬─────────┘  └──────────────┬──────────────┘
//!                                │                           │
//!                                ▼                           ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Persistence (sqlx)                                │
//! │                      PostgreSQL / SQLite                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Phase execution (plan/apply) happens outside the engine in a worker
//! process or agent reached through the [`dispatch::PhaseDispatcher`] seam;
//! completions flow back through [`handlers::run`]. Domain events go out
//! through the [`events::EventSink`] seam with at-least-once delivery.
//!
//! # Run Status State Machine
//!
//! ```text
//!                     ┌─────────┐
//!                     │ PENDING │
//!                     └────┬────┘
//!         lock acquired    │    lock busy or queue non-empty
//!          ┌───────────────┴───────────────┐
//!          ▼                               ▼
//!     ┌──────────┐       promote      ┌────────┐
//!     │ PLANNING │◄───────────────────│ QUEUED │
//!     └────┬─────┘                    └────────┘
//!          │ plan completed
//!          ▼
//!     ┌─────────┐   apply / auto-apply   ┌──────────┐
//!     │ PLANNED │───────────────────────►│ APPLYING │
//!     └────┬────┘                        └────┬─────┘
//!          │ discard                          │ apply completed
//!          ▼                                  ▼
//!     ┌───────────┐                      ┌─────────┐
//!     │ DISCARDED │                      │ APPLIED │──► state version created
//!     └───────────┘                      └─────────┘
//! ```
//!
//! Phase failure leads to ERRORED, cancellation to CANCELED. Plan-only runs
//! terminate at PLANNED. Terminal outcomes release the workspace lock and
//! promote the next queued run.
//!
//! ## Status Descriptions
//!
//! | Status | Description |
//! |--------|-------------|
//! | `pending` | Created but not yet scheduled |
//! | `queued` | Waiting behind another run for the workspace lock |
//! | `planning` | Plan phase in progress |
//! | `planned` | Plan finished; awaiting apply (terminal for plan-only runs) |
//! | `applying` | Apply phase in progress |
//! | `applied` | Apply finished; state version created |
//! | `discarded` | Abandoned without applying |
//! | `errored` | A phase failed |
//! | `canceled` | Canceled before completion |
//!
//! # State Consistency
//!
//! Every workspace's state history is ordered by a monotonic serial and
//! addressed by a hex SHA-256 content digest:
//!
//! - a submitted serial below the current serial fails with
//!   `SERIAL_CONFLICT`;
//! - re-submitting the current serial succeeds only for byte-identical
//!   content (idempotent retry) and otherwise fails with `DIGEST_MISMATCH`;
//! - version insertion and the workspace's current-pointer update happen in
//!   one transaction, guarded against concurrent writers;
//! - rollback appends a fresh version carrying a historical snapshot's
//!   content, the one deliberate exception to serial ordering.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `STRATA_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `STRATA_MAX_STATE_BYTES` | No | `10485760` | Maximum state payload size |
//! | `STRATA_PAGE_SIZE` | No | `20` | Default list page size |
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`dispatch`]: Phase execution collaborator interface
//! - [`error`]: Error types with stable machine-readable codes
//! - [`events`]: Domain events and sink implementations
//! - [`handlers`]: Orchestration facade (runs, state versions, workspaces)
//! - [`ids`]: Prefixed resource identifiers
//! - [`migrations`]: Embedded database migrations
//! - [`persistence`]: Persistence trait and PostgreSQL/SQLite backends
//! - [`rbac`]: Subjects, actions, roles, and the policy check
//! - [`run`]: Run lifecycle domain types
//! - [`scheduler`]: Per-workspace run serialization
//! - [`state`]: State document parsing, digests, and the version store

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Phase execution collaborator interface.
pub mod dispatch;

/// Error types for engine operations with stable error codes.
pub mod error;

/// Domain events and the sink interface they are delivered through.
pub mod events;

/// Orchestration facade handlers (runs, state versions, workspaces).
pub mod handlers;

/// Prefixed resource identifiers.
pub mod ids;

/// Embedded database migrations.
pub mod migrations;

/// Persistence trait and backends.
pub mod persistence;

/// Role-based access control.
pub mod rbac;

/// Run lifecycle domain types.
pub mod run;

/// Per-workspace run scheduling.
pub mod scheduler;

/// State document parsing, digests, and the version store.
pub mod state;
