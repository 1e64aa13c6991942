// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Status events and the bus they are published on.
//!
//! Every externally visible status change is a [`StatusEvent`] carrying the
//! session name, a [`Phase`], the status snapshot at emission time and an
//! optional payload. Per-operation rejections are [`DeniedEvent`]s: they are
//! not session-state transitions.
//!
//! | Topic | Event |
//! |-------|-------|
//! | [`TOPIC_UPDATE`] | `StatusEvent` with phase `active`, `paused`, `stopped`, `ready` |
//! | [`TOPIC_ERROR`] | `StatusEvent` with phase `error` |
//! | [`TOPIC_DENIED`] | `DeniedEvent` |

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::session::MirrorStatus;
use crate::store::{CompletionSummary, SyncFailure};

pub const TOPIC_UPDATE: &str = "mirror:update";
pub const TOPIC_ERROR: &str = "mirror:error";
pub const TOPIC_DENIED: &str = "mirror:denied";

/// What a [`StatusEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Active,
    Paused,
    Stopped,
    Ready,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Active => "active",
            Phase::Paused => "paused",
            Phase::Stopped => "stopped",
            Phase::Ready => "ready",
            Phase::Error => "error",
        };
        f.write_str(label)
    }
}

/// A session status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub name: String,
    pub phase: Phase,
    pub status: MirrorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CompletionSummary>,
}

impl StatusEvent {
    pub fn new(name: impl Into<String>, phase: Phase, status: MirrorStatus) -> Self {
        Self {
            name: name.into(),
            phase,
            status,
            error: None,
            summary: None,
        }
    }

    pub fn with_error(mut self, error: SyncFailure) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_summary(mut self, summary: CompletionSummary) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// The remote rejected a read or write. The session keeps syncing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeniedEvent {
    pub name: String,
    pub error: SyncFailure,
    pub status: MirrorStatus,
}

/// Anything a session publishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MirrorEvent {
    Status(StatusEvent),
    Denied(DeniedEvent),
}

impl MirrorEvent {
    /// Bus topic this event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            MirrorEvent::Status(e) if e.phase == Phase::Error => TOPIC_ERROR,
            MirrorEvent::Status(_) => TOPIC_UPDATE,
            MirrorEvent::Denied(_) => TOPIC_DENIED,
        }
    }

    /// Name of the session that emitted the event.
    pub fn name(&self) -> &str {
        match self {
            MirrorEvent::Status(e) => &e.name,
            MirrorEvent::Denied(e) => &e.name,
        }
    }

    /// Phase for status events, `None` for denials.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            MirrorEvent::Status(e) => Some(e.phase),
            MirrorEvent::Denied(_) => None,
        }
    }

    /// Status snapshot at emission time.
    pub fn status(&self) -> MirrorStatus {
        match self {
            MirrorEvent::Status(e) => e.status,
            MirrorEvent::Denied(e) => e.status,
        }
    }
}

/// Publish side of the host application's notification bus.
///
/// Implementations fan an event out to every listener registered on the
/// topic, synchronously and in registration order.
pub trait EventBus: Send + Sync + 'static {
    fn broadcast(&self, topic: &str, event: &MirrorEvent);
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&MirrorEvent) + Send + Sync>;

/// In-process [`EventBus`].
#[derive(Default)]
pub struct LocalEventBus {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a topic.
    pub fn on<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&MirrorEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Register a listener that forwards events into a channel.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<MirrorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on(topic, move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Subscribe to all mirror topics on one channel.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<MirrorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for topic in [TOPIC_UPDATE, TOPIC_ERROR, TOPIC_DENIED] {
            let tx = tx.clone();
            self.on(topic, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners.read().get(topic).map_or(0, Vec::len)
    }
}

impl EventBus for LocalEventBus {
    fn broadcast(&self, topic: &str, event: &MirrorEvent) {
        // Snapshot so listeners may register further listeners without deadlocking.
        let listeners: Vec<Listener> = match self.listeners.read().get(topic) {
            Some(list) => list.clone(),
            None => return,
        };
        for listener in listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics: Vec<String> = self.listeners.read().keys().cloned().collect();
        f.debug_struct("LocalEventBus").field("topics", &topics).finish()
    }
}
