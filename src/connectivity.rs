// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network connectivity signal.
//!
//! The host feeds the runtime's online/offline signal into a
//! [`ConnectivityMonitor`] via [`set_online()`](ConnectivityMonitor::set_online).
//! The monitor caches the current flag for synchronous reads and fans out one
//! [`ConnectivityEvent`] per genuine transition. Repeating the current state
//! is not a transition and produces no event. There is no polling and no
//! debouncing.
//!
//! One monitor is constructed per process and shared (by `Arc`) with every
//! mirror session.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::info;

use crate::metrics;

/// Capacity of the transition channel. A receiver that falls further behind
/// gets `Lagged` and should resync from [`ConnectivityMonitor::is_online()`].
const TRANSITION_CAPACITY: usize = 64;

/// A genuine connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

impl ConnectivityEvent {
    /// The event that leads to the given state.
    pub fn for_state(online: bool) -> Self {
        if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameOffline
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, ConnectivityEvent::BecameOnline)
    }
}

impl std::fmt::Display for ConnectivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityEvent::BecameOnline => write!(f, "became-online"),
            ConnectivityEvent::BecameOffline => write!(f, "became-offline"),
        }
    }
}

/// Process-wide online/offline state.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    transitions: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the runtime's "currently online" flag.
    pub fn new(initially_online: bool) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        metrics::set_online(initially_online);
        Self {
            online: AtomicBool::new(initially_online),
            transitions,
        }
    }

    /// Current cached state.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Feed the runtime signal. Returns the transition if the state changed.
    ///
    /// The cached flag is updated before the event is published, so anyone
    /// handling the event observes the new state.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return None;
        }

        let event = ConnectivityEvent::for_state(online);
        info!(event = %event, "Connectivity changed");
        metrics::set_online(online);
        metrics::record_connectivity_transition(online);

        // No receivers is fine: nothing is listening yet.
        let _ = self.transitions.send(event);
        Some(event)
    }

    /// Subscribe to transitions that happen after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.transitions.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    /// Starts online.
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("subscribers", &self.transitions.receiver_count())
            .finish()
    }
}
