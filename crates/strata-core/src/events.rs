// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain events and the sink interface they are delivered through.
//!
//! Delivery is at-least-once: a sink may see the same event more than once
//! and consumers deduplicate by `event_id`. The engine never waits for
//! downstream consumers; sinks are expected to hand off quickly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::ids;
use crate::run::RunStatus;

/// A domain event emitted by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run moved between statuses.
    RunStatusChanged {
        /// Unique event identity for consumer-side dedup.
        event_id: String,
        /// The run that changed.
        run_id: String,
        /// The workspace the run targets.
        workspace_id: String,
        /// Status before the transition.
        from: RunStatus,
        /// Status after the transition.
        to: RunStatus,
        /// When the transition happened.
        timestamp: DateTime<Utc>,
    },
    /// A new state version became a workspace's current version.
    StateVersionCreated {
        /// Unique event identity for consumer-side dedup.
        event_id: String,
        /// The workspace the version belongs to.
        workspace_id: String,
        /// The new version's ID.
        state_version_id: String,
        /// The new version's serial.
        serial: i64,
        /// When the version was created.
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Build a run status change event with a fresh identity.
    pub fn run_status_changed(
        run_id: &str,
        workspace_id: &str,
        from: RunStatus,
        to: RunStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::RunStatusChanged {
            event_id: ids::new_id("ev"),
            run_id: run_id.to_string(),
            workspace_id: workspace_id.to_string(),
            from,
            to,
            timestamp,
        }
    }

    /// Build a state version creation event with a fresh identity.
    pub fn state_version_created(
        workspace_id: &str,
        state_version_id: &str,
        serial: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::StateVersionCreated {
            event_id: ids::new_id("ev"),
            workspace_id: workspace_id.to_string(),
            state_version_id: state_version_id.to_string(),
            serial,
            timestamp,
        }
    }

    /// The event's unique identity.
    pub fn event_id(&self) -> &str {
        match self {
            Self::RunStatusChanged { event_id, .. } => event_id,
            Self::StateVersionCreated { event_id, .. } => event_id,
        }
    }
}

/// Destination for domain events.
///
/// Implementations may fan events out over channels, queues, or callbacks;
/// the contract is at-least-once delivery with consumer-side dedup.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block on slow consumers.
    async fn publish(&self, event: Event);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn publish(&self, _event: Event) {}
}

/// Sink backed by a tokio broadcast channel.
///
/// Lagging receivers lose old events rather than applying backpressure,
/// which matches the at-least-once contract: consumers that need a full
/// history replay from persistence.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    /// Create a sink with the given channel capacity, returning the sink and
    /// an initial receiver.
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    /// Create an additional receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn publish(&self, event: Event) {
        // A send error just means no receiver is currently subscribed.
        let _ = self.tx.send(event);
    }
}

/// Sink that buffers events in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events delivered so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Drain and return all buffered events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_buffers_in_order() {
        let sink = MemorySink::new();
        let now = Utc::now();
        sink.publish(Event::run_status_changed(
            "run-1",
            "ws-1",
            RunStatus::Pending,
            RunStatus::Planning,
            now,
        ))
        .await;
        sink.publish(Event::state_version_created("ws-1", "sv-1", 1, now))
            .await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::RunStatusChanged { .. }));
        assert!(matches!(events[1], Event::StateVersionCreated { .. }));
    }

    #[tokio::test]
    async fn test_event_ids_are_unique() {
        let now = Utc::now();
        let a = Event::state_version_created("ws-1", "sv-1", 1, now);
        let b = Event::state_version_created("ws-1", "sv-1", 1, now);
        assert_ne!(a.event_id(), b.event_id());
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscriber() {
        let (sink, mut rx) = BroadcastSink::new(8);
        sink.publish(Event::state_version_created("ws-1", "sv-1", 1, Utc::now()))
            .await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::StateVersionCreated { serial: 1, .. }));
    }

    #[tokio::test]
    async fn test_broadcast_sink_tolerates_no_subscribers() {
        let (sink, rx) = BroadcastSink::new(8);
        drop(rx);
        // Must not panic or error.
        sink.publish(Event::state_version_created("ws-1", "sv-1", 1, Utc::now()))
            .await;
    }
}
