//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Session status and lifecycle (bootstrap, attach, destroy)
//! - Sync engine notifications
//! - Published status events
//! - Connectivity transitions
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `mirror_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed by this crate; without one every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

use crate::session::SyncState;

/// Record a notification received from a remote sync.
pub fn record_sync_event(name: &str, kind: &'static str) {
    counter!("mirror_sync_events_total", "name" => name.to_string(), "kind" => kind).increment(1);
}

/// Record a status event published on the bus.
pub fn record_event_published(name: &str, topic: &'static str) {
    counter!("mirror_events_published_total", "name" => name.to_string(), "topic" => topic).increment(1);
}

/// Gauge for session status.
pub fn set_session_status(name: &str, status: SyncState) {
    // Encode state as numeric for alerting
    let value = match status {
        SyncState::Stopped => 0.0,
        SyncState::Offline => 1.0,
        SyncState::NoRemote => 2.0,
        SyncState::Syncing => 3.0,
        SyncState::Error => 4.0,
    };
    gauge!("mirror_session_status", "name" => name.to_string()).set(value);
}

/// Record a completed disk → memory bootstrap.
pub fn record_bootstrap(name: &str, docs_written: usize, duration: Duration) {
    counter!("mirror_bootstrap_docs_total", "name" => name.to_string()).increment(docs_written as u64);
    histogram!("mirror_bootstrap_duration_seconds", "name" => name.to_string())
        .record(duration.as_secs_f64());
}

/// Record a failed bootstrap.
pub fn record_bootstrap_failure(name: &str) {
    counter!("mirror_bootstrap_failures_total", "name" => name.to_string()).increment(1);
}

/// Record a remote sync being attached.
pub fn record_sync_attached(name: &str) {
    counter!("mirror_sync_attached_total", "name" => name.to_string()).increment(1);
}

/// Record a remote sync being cancelled.
pub fn record_sync_cancelled(name: &str, reason: &'static str) {
    counter!("mirror_sync_cancelled_total", "name" => name.to_string(), "reason" => reason).increment(1);
}

/// Record a failure to open the remote store.
pub fn record_remote_open_failure(name: &str) {
    counter!("mirror_remote_open_failures_total", "name" => name.to_string()).increment(1);
}

/// Record local store destruction.
pub fn record_destroy(name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mirror_destroy_total", "name" => name.to_string(), "status" => status).increment(1);
}

/// Gauge for the process-wide online flag.
pub fn set_online(online: bool) {
    gauge!("mirror_online").set(if online { 1.0 } else { 0.0 });
}

/// Record a connectivity transition.
pub fn record_connectivity_transition(online: bool) {
    let to = if online { "online" } else { "offline" };
    counter!("mirror_connectivity_transitions_total", "to" => to).increment(1);
}
