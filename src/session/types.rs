//! Session status types.
//!
//! # Status Transitions
//!
//! ```text
//!                      start() [remote, online]
//!   Stopped ───────────────────────────────────→ Syncing ←─────┐
//!     │  ↑                                          │  │        │
//!     │  │ stop() / complete                        │  │ error  │ became-online
//!     │  └──────────────────────────────────────────┘  ↓        │
//!     │                                              Error      │
//!     │ start() [no remote]          became-offline             │
//!     ↓                            Syncing ───────→ Offline ────┘
//!   NoRemote
//! ```
//!
//! `active` and `ready` refine the status:
//! - **active**: a sync round is transferring data (vs. caught up).
//! - **ready**: the session reached its first settled state since the last
//!   explicit stop (first `paused`, or the offline / no-remote branch of `start()`).

use serde::{Deserialize, Serialize};

/// Externally visible summary of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    /// Not syncing remotely: never started, explicitly stopped, or the sync closed.
    Stopped,
    /// A remote is configured but connectivity is down.
    Offline,
    /// No remote endpoint is configured; the mirror is local-only.
    NoRemote,
    /// A remote sync is attached.
    Syncing,
    /// The remote sync reported an error (including normalized auth failures).
    Error,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Stopped => write!(f, "stopped"),
            SyncState::Offline => write!(f, "offline"),
            SyncState::NoRemote => write!(f, "no-remote"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Error => write!(f, "error"),
        }
    }
}

/// Read-only snapshot of `(status, active, ready)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStatus {
    pub status: SyncState,
    pub active: bool,
    pub ready: bool,
}

impl MirrorStatus {
    /// Status of a freshly created session.
    pub fn initial() -> Self {
        Self {
            status: SyncState::Stopped,
            active: false,
            ready: false,
        }
    }
}

impl Default for MirrorStatus {
    fn default() -> Self {
        Self::initial()
    }
}
