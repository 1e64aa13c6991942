//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A scripted mock [`StoreEngine`](mirror_engine::StoreEngine) recording every call
//! - Helpers to wire up a session and wait on its status and events
//!
//! Set `RUST_LOG=mirror_engine=debug` to see the session logs.

#![allow(dead_code)]

pub mod mock_engine;

pub use mock_engine::*;

use mirror_engine::{
    create_mirror, ConnectivityMonitor, LocalEventBus, MirrorConfig, MirrorEvent, MirrorHandle, MirrorStatus,
    StoreEngine, SyncState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Remote URL used by tests that need a remote.
pub const REMOTE_URL: &str = "https://db.example.test/notes";

/// A session plus everything wired into it.
pub struct Harness<E: StoreEngine> {
    pub engine: Arc<E>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub bus: Arc<LocalEventBus>,
    pub events: mpsc::UnboundedReceiver<MirrorEvent>,
    pub mirror: MirrorHandle<E>,
}

/// Create a session and subscribe to all of its topics before it starts.
pub fn harness<E: StoreEngine>(engine: Arc<E>, online: bool, config: MirrorConfig) -> Harness<E> {
    let connectivity = Arc::new(ConnectivityMonitor::new(online));
    harness_with(engine, connectivity, config)
}

pub fn harness_with<E: StoreEngine>(
    engine: Arc<E>,
    connectivity: Arc<ConnectivityMonitor>,
    config: MirrorConfig,
) -> Harness<E> {
    init_tracing();
    let bus = Arc::new(LocalEventBus::new());
    let events = bus.subscribe_all();
    let mirror = create_mirror(
        Arc::clone(&engine),
        Arc::clone(&connectivity),
        Arc::clone(&bus) as Arc<dyn mirror_engine::EventBus>,
        config,
    )
    .expect("create_mirror failed");
    Harness {
        engine,
        connectivity,
        bus,
        events,
        mirror,
    }
}

/// Install a test log subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a remote and fast retry.
pub fn remote_config(name: &str) -> MirrorConfig {
    MirrorConfig::for_testing(name).with_remote(REMOTE_URL)
}

/// Wait until the session status satisfies `pred`.
pub async fn wait_status<E, F>(mirror: &MirrorHandle<E>, pred: F) -> MirrorStatus
where
    E: StoreEngine,
    F: Fn(&MirrorStatus) -> bool,
{
    let mut rx = mirror.status_receiver();
    let status = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for status")
        .expect("session driver gone");
    *status
}

pub async fn wait_state<E: StoreEngine>(mirror: &MirrorHandle<E>, state: SyncState) -> MirrorStatus {
    wait_status(mirror, |s| s.status == state).await
}

/// Next published event.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<MirrorEvent>) -> MirrorEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Everything published so far, without waiting.
pub fn drain(events: &mut mpsc::UnboundedReceiver<MirrorEvent>) -> Vec<MirrorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Poll `cond` until it holds.
pub async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let result = tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {what}");
}

/// Let spawned tasks run without advancing towards any condition.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
