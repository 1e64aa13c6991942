// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The mirror session state machine.
//!
//! [`SessionState`] holds the flags of one session and turns each input
//! (start, stop, connectivity change, sync engine event) into the status
//! events to publish. It performs no I/O: the driver in the parent module
//! executes the engine calls the returned decisions ask for.
//!
//! # Sync generations
//!
//! Every attached sync gets a new generation number. Only events of the
//! latest generation are applied. Once that sync is cancelled, only its
//! `Complete` is still applied; anything else it emits is late noise.

use tracing::debug;

use super::types::{MirrorStatus, SyncState};
use crate::events::{DeniedEvent, MirrorEvent, Phase, StatusEvent};
use crate::store::{SyncEvent, SyncFailure};

/// What `start()` asks the driver to do.
#[derive(Debug, PartialEq)]
pub enum StartDecision {
    /// A sync is already attached; nothing to do.
    AlreadySyncing,
    /// Open the remote (if needed), attach a sync, then call [`SessionState::attached()`].
    Attach,
    /// No remote sync possible right now; publish these events.
    Settled(Vec<MirrorEvent>),
}

/// Flags of one mirror session.
#[derive(Debug, Clone)]
pub struct SessionState {
    name: String,
    has_remote: bool,
    syncing: bool,
    stopped: bool,
    status: SyncState,
    active: bool,
    ready: bool,
    generation: u64,
}

impl SessionState {
    pub fn new(name: impl Into<String>, has_remote: bool) -> Self {
        Self {
            name: name.into(),
            has_remote,
            syncing: false,
            stopped: true,
            status: SyncState::Stopped,
            active: false,
            ready: false,
            generation: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> MirrorStatus {
        MirrorStatus {
            status: self.status,
            active: self.active,
            ready: self.ready,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Latest generation issued by [`attached()`](Self::attached).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn status_event(&self, phase: Phase) -> StatusEvent {
        StatusEvent::new(self.name.clone(), phase, self.snapshot())
    }

    fn latch_ready(&mut self) -> Option<MirrorEvent> {
        if self.ready {
            return None;
        }
        self.ready = true;
        Some(MirrorEvent::Status(self.status_event(Phase::Ready)))
    }

    /// Begin (or resume) remote sync.
    pub fn start(&mut self, online: bool) -> StartDecision {
        self.stopped = false;
        if self.syncing {
            return StartDecision::AlreadySyncing;
        }
        if self.has_remote && online {
            return StartDecision::Attach;
        }

        self.status = if self.has_remote {
            SyncState::Offline
        } else {
            SyncState::NoRemote
        };
        StartDecision::Settled(self.latch_ready().into_iter().collect())
    }

    /// A sync was attached. Returns its generation.
    pub fn attached(&mut self) -> u64 {
        self.generation += 1;
        self.syncing = true;
        self.status = SyncState::Syncing;
        self.generation
    }

    /// The remote store could not be opened.
    pub fn attach_failed(&mut self, failure: SyncFailure) -> Vec<MirrorEvent> {
        self.active = false;
        self.status = SyncState::Error;
        vec![MirrorEvent::Status(self.status_event(Phase::Error).with_error(failure))]
    }

    /// The disk → memory bootstrap failed.
    pub fn bootstrap_failed(&mut self, failure: SyncFailure) -> Vec<MirrorEvent> {
        self.status = SyncState::Error;
        vec![MirrorEvent::Status(self.status_event(Phase::Error).with_error(failure))]
    }

    /// Apply an event from the sync of the given generation.
    pub fn on_sync_event(&mut self, generation: u64, event: SyncEvent) -> Vec<MirrorEvent> {
        if generation != self.generation {
            debug!(
                name = %self.name,
                generation,
                current = self.generation,
                event = event.kind(),
                "Ignoring event from superseded sync"
            );
            return Vec::new();
        }
        if !self.syncing && !matches!(event, SyncEvent::Complete(_)) {
            debug!(name = %self.name, generation, event = event.kind(), "Ignoring event from cancelled sync");
            return Vec::new();
        }

        match event {
            SyncEvent::Active => {
                self.active = true;
                vec![MirrorEvent::Status(self.status_event(Phase::Active))]
            }
            SyncEvent::Paused => {
                self.active = false;
                let mut events: Vec<MirrorEvent> = self.latch_ready().into_iter().collect();
                events.push(MirrorEvent::Status(self.status_event(Phase::Paused)));
                events
            }
            SyncEvent::Complete(summary) => {
                self.active = false;
                self.syncing = false;
                if summary.has_authorization_failure() {
                    self.status = SyncState::Error;
                    let event = self
                        .status_event(Phase::Error)
                        .with_error(SyncFailure::unauthorized())
                        .with_summary(summary);
                    vec![MirrorEvent::Status(event)]
                } else {
                    // A connectivity-induced pause stays visible as offline.
                    if self.status != SyncState::Offline {
                        self.status = SyncState::Stopped;
                    }
                    vec![MirrorEvent::Status(self.status_event(Phase::Stopped).with_summary(summary))]
                }
            }
            SyncEvent::Denied(error) => vec![MirrorEvent::Denied(DeniedEvent {
                name: self.name.clone(),
                error,
                status: self.snapshot(),
            })],
            SyncEvent::Error(error) => {
                self.active = false;
                self.status = SyncState::Error;
                vec![MirrorEvent::Status(self.status_event(Phase::Error).with_error(error))]
            }
        }
    }

    /// Connectivity came back. Returns whether `start()` should run.
    pub fn went_online(&self) -> bool {
        !self.stopped
    }

    /// Connectivity was lost. Returns whether the attached sync must be cancelled.
    pub fn went_offline(&mut self) -> bool {
        if !self.stopped && self.has_remote {
            self.status = SyncState::Offline;
        }
        self.pause()
    }

    /// Detach the current sync. Returns whether there was one to cancel.
    ///
    /// Leaves `status` alone; callers set it as appropriate.
    pub fn pause(&mut self) -> bool {
        if !self.syncing {
            return false;
        }
        self.syncing = false;
        self.active = false;
        true
    }

    /// Explicit stop. Returns whether the attached sync must be cancelled.
    pub fn stop(&mut self) -> bool {
        self.stopped = true;
        self.status = SyncState::Stopped;
        self.ready = false;
        self.pause()
    }
}
