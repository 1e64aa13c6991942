// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror session orchestration.
//!
//! A session wires three stores together:
//! - a volatile **memory** store that the application reads and writes,
//! - a durable **disk** store,
//! - lazily, a **remote** store reached over the network.
//!
//! # Lifecycle
//!
//! 1. [`create_mirror()`] opens the memory and disk stores and spawns the
//!    session driver.
//! 2. The driver bootstraps: disk → memory once, then a permanent live
//!    memory → disk replication.
//! 3. Only then does it run `start()` and begin processing commands,
//!    connectivity transitions and sync notifications, one at a time.
//!
//! All state lives in the driver task, so every input is handled to
//! completion before the next one is looked at.

mod state;
mod types;

pub use state::{SessionState, StartDecision};
pub use types::{MirrorStatus, SyncState};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::{MirrorConfig, SyncOptions};
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{MirrorError, Result};
use crate::events::{EventBus, MirrorEvent};
use crate::metrics;
use crate::store::{Document, Store, StoreEngine, StoreInfo, SyncCanceller, SyncEvent, SyncFailure};

/// Requests from a [`MirrorHandle`] to its driver.
enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Destroy(oneshot::Sender<Result<()>>),
}

/// Create a mirror session.
///
/// Opens the memory store (`<name>_mem`) and the disk store (`<name>`) and
/// spawns the session driver, which bootstraps and then starts syncing.
/// Must be called from within a tokio runtime.
pub fn create_mirror<E: StoreEngine>(
    engine: Arc<E>,
    connectivity: Arc<ConnectivityMonitor>,
    bus: Arc<dyn EventBus>,
    config: MirrorConfig,
) -> Result<MirrorHandle<E>> {
    config.validate().map_err(MirrorError::Config)?;

    let memory = engine
        .open(&config.memory_store_name(), &config.memory_store_options())
        .map_err(|e| MirrorError::store("open memory store", e))?;
    let disk = engine
        .open(config.name(), &config.disk_store_options())
        .map_err(|e| MirrorError::store("open disk store", e))?;

    let name = config.name().to_string();
    let (status_tx, status_rx) = watch::channel(MirrorStatus::initial());
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (sync_tx, sync_rx) = mpsc::unbounded_channel();
    let (generation_tx, _) = watch::channel(0);
    // Subscribe before spawning so no transition is missed during bootstrap.
    let connectivity_rx = connectivity.subscribe();

    let driver = SessionDriver {
        state: SessionState::new(name.clone(), config.remote_url.is_some()),
        engine,
        config,
        connectivity,
        bus,
        memory: Arc::clone(&memory),
        disk,
        remote: None,
        attached: None,
        status_tx,
        sync_tx,
        generation_tx,
    };

    info!(name = %name, "Creating mirror session");
    tokio::spawn(driver.run(command_rx, connectivity_rx, sync_rx));

    Ok(MirrorHandle {
        name,
        memory,
        commands: command_tx,
        status_rx,
    })
}

/// Owner-facing handle to a mirror session.
///
/// Wraps the memory store: document operations pass straight through to it,
/// while sync control goes to the session driver. Dropping the last handle
/// shuts the driver down and cancels any remote sync.
pub struct MirrorHandle<E: StoreEngine> {
    name: String,
    memory: Arc<E::Store>,
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<MirrorStatus>,
}

impl<E: StoreEngine> MirrorHandle<E> {
    /// Session name (the disk store name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The memory store this handle wraps.
    pub fn store(&self) -> &Arc<E::Store> {
        &self.memory
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| MirrorError::Shutdown)?;
        rx.await.map_err(|_| MirrorError::Shutdown)
    }

    /// Start (or resume) remote sync. A no-op while already syncing.
    pub async fn start_sync(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Stop remote sync regardless of connectivity. Connectivity changes
    /// will not restart it until [`start_sync()`](Self::start_sync) is called.
    pub async fn stop_sync(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Current `(status, active, ready)` snapshot.
    pub fn sync_status(&self) -> MirrorStatus {
        *self.status_rx.borrow()
    }

    /// Watch status changes.
    pub fn status_receiver(&self) -> watch::Receiver<MirrorStatus> {
        self.status_rx.clone()
    }

    /// Wait until the session has reached a settled state.
    pub async fn wait_ready(&self) -> Result<MirrorStatus> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| status.ready)
            .await
            .map_err(|_| MirrorError::Shutdown)?;
        Ok(*status)
    }

    /// Whether the driver is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop syncing and irrecoverably remove the disk and memory stores.
    ///
    /// Fails if either removal fails; the other store may already be gone.
    pub async fn destroy_local(self) -> Result<()> {
        self.request(Command::Destroy).await?
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        self.memory.get(id).await.map_err(|e| MirrorError::store("get", e))
    }

    /// Write a document to the memory store. Returns the new revision.
    pub async fn put(&self, doc: Document) -> Result<u64> {
        self.memory.put(doc).await.map_err(|e| MirrorError::store("put", e))
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.memory.remove(id).await.map_err(|e| MirrorError::store("remove", e))
    }

    pub async fn all_docs(&self) -> Result<Vec<Document>> {
        self.memory.all_docs().await.map_err(|e| MirrorError::store("all_docs", e))
    }

    pub async fn info(&self) -> Result<StoreInfo> {
        self.memory.info().await.map_err(|e| MirrorError::store("info", e))
    }
}

impl<E: StoreEngine> std::fmt::Debug for MirrorHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorHandle")
            .field("name", &self.name)
            .field("status", &self.sync_status())
            .finish()
    }
}

/// The task that owns a session's state.
struct SessionDriver<E: StoreEngine> {
    state: SessionState,
    engine: Arc<E>,
    config: MirrorConfig,
    connectivity: Arc<ConnectivityMonitor>,
    bus: Arc<dyn EventBus>,
    memory: Arc<E::Store>,
    disk: Arc<E::Store>,
    /// Created on the first sync attempt, then reused.
    remote: Option<Arc<E::Store>>,
    /// Cancel switch of the attached sync; `Some` only while syncing.
    attached: Option<SyncCanceller>,
    status_tx: watch::Sender<MirrorStatus>,
    sync_tx: mpsc::UnboundedSender<(u64, SyncEvent)>,
    /// Generation of the latest attached sync; forwarders of older ones exit.
    generation_tx: watch::Sender<u64>,
}

impl<E: StoreEngine> SessionDriver<E> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut connectivity_rx: broadcast::Receiver<ConnectivityEvent>,
        mut sync_rx: mpsc::UnboundedReceiver<(u64, SyncEvent)>,
    ) {
        if self.bootstrap().await {
            self.start();
        }

        let mut connectivity_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start(ack)) => {
                        self.start();
                        let _ = ack.send(());
                    }
                    Some(Command::Stop(ack)) => {
                        self.stop();
                        let _ = ack.send(());
                    }
                    Some(Command::Destroy(ack)) => {
                        let result = self.destroy().await;
                        let _ = ack.send(result);
                        break;
                    }
                    None => {
                        debug!(name = %self.state.name(), "All handles dropped");
                        break;
                    }
                },
                transition = connectivity_rx.recv(), if connectivity_open => match transition {
                    Ok(event) => self.on_connectivity(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let online = self.connectivity.is_online();
                        warn!(name = %self.state.name(), skipped, online, "Connectivity events lagged, resyncing");
                        self.on_connectivity(ConnectivityEvent::for_state(online));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        connectivity_open = false;
                    }
                },
                Some((generation, event)) = sync_rx.recv() => {
                    self.on_sync_event(generation, event);
                }
            }
        }

        if self.state.pause() {
            self.cancel_attached("shutdown");
        }
        self.commit(Vec::new());
        info!(name = %self.state.name(), "Mirror session stopped");
    }

    /// Replicate disk → memory once, then keep memory → disk live.
    async fn bootstrap(&mut self) -> bool {
        let name = self.state.name().to_string();
        let started = Instant::now();
        match self
            .engine
            .replicate_once(Arc::clone(&self.disk), Arc::clone(&self.memory))
            .await
        {
            Ok(report) => {
                info!(
                    name = %name,
                    docs_written = report.docs_written,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Bootstrapped memory store from disk"
                );
                metrics::record_bootstrap(&name, report.docs_written, started.elapsed());
                self.engine
                    .replicate_live(Arc::clone(&self.memory), Arc::clone(&self.disk));
                true
            }
            Err(e) => {
                error!(name = %name, error = %e, "Bootstrap from disk failed");
                metrics::record_bootstrap_failure(&name);
                let failure = SyncFailure::new("bootstrap_failed").with_reason(e.to_string());
                let events = self.state.bootstrap_failed(failure);
                self.commit(events);
                false
            }
        }
    }

    fn start(&mut self) {
        let online = self.connectivity.is_online();
        match self.state.start(online) {
            StartDecision::AlreadySyncing => {
                debug!(name = %self.state.name(), "Already syncing");
                self.commit(Vec::new());
            }
            StartDecision::Settled(events) => {
                debug!(name = %self.state.name(), status = %self.state.snapshot().status, "No remote sync");
                self.commit(events);
            }
            StartDecision::Attach => self.attach_sync(),
        }
    }

    fn attach_sync(&mut self) {
        let remote = match self.remote_store() {
            Ok(remote) => remote,
            Err(failure) => {
                metrics::record_remote_open_failure(self.state.name());
                let events = self.state.attach_failed(failure);
                self.commit(events);
                return;
            }
        };

        // Sessions only end a sync by cancelling it; the config only tunes backoff.
        let options = SyncOptions {
            live: true,
            retry: true,
            ..self.config.sync.clone()
        };
        let handle = self.engine.sync(remote, Arc::clone(&self.memory), &options);
        let generation = self.state.attached();
        let (canceller, mut events) = handle.into_parts();
        self.attached = Some(canceller);
        self.generation_tx.send_replace(generation);

        let sync_tx = self.sync_tx.clone();
        let mut latest = self.generation_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if sync_tx.send((generation, event)).is_err() {
                            break;
                        }
                    }
                    // Superseded, or the driver is gone.
                    _ = latest.changed() => break,
                }
            }
            debug!(generation, "Sync event forwarder finished");
        });

        info!(name = %self.state.name(), generation, "Remote sync attached");
        metrics::record_sync_attached(self.state.name());
        self.commit(Vec::new());
    }

    fn remote_store(&mut self) -> std::result::Result<Arc<E::Store>, SyncFailure> {
        if let Some(remote) = &self.remote {
            return Ok(Arc::clone(remote));
        }
        let Some(url) = self.config.remote_url.as_deref() else {
            return Err(SyncFailure::new("no_remote"));
        };
        match self.engine.open(url, &self.config.remote_options) {
            Ok(remote) => {
                debug!(name = %self.state.name(), "Opened remote store");
                self.remote = Some(Arc::clone(&remote));
                Ok(remote)
            }
            Err(e) => {
                warn!(name = %self.state.name(), error = %e, "Failed to open remote store");
                Err(SyncFailure::new("remote_unavailable").with_reason(e.to_string()))
            }
        }
    }

    fn cancel_attached(&mut self, reason: &'static str) {
        if let Some(canceller) = self.attached.take() {
            debug!(name = %self.state.name(), reason, "Cancelling remote sync");
            metrics::record_sync_cancelled(self.state.name(), reason);
            canceller.cancel();
        }
    }

    fn stop(&mut self) {
        info!(name = %self.state.name(), "Stopping sync");
        if self.state.stop() {
            self.cancel_attached("stopped");
        }
        self.commit(Vec::new());
    }

    fn on_connectivity(&mut self, event: ConnectivityEvent) {
        debug!(name = %self.state.name(), event = %event, "Connectivity transition");
        match event {
            ConnectivityEvent::BecameOnline => {
                if self.state.went_online() {
                    self.start();
                }
            }
            ConnectivityEvent::BecameOffline => {
                if self.state.went_offline() {
                    self.cancel_attached("offline");
                }
                self.commit(Vec::new());
            }
        }
    }

    fn on_sync_event(&mut self, generation: u64, event: SyncEvent) {
        metrics::record_sync_event(self.state.name(), event.kind());
        let events = self.state.on_sync_event(generation, event);
        if !self.state.is_syncing() {
            // Closed by the engine itself, or already cancelled.
            self.attached = None;
        }
        self.commit(events);
    }

    async fn destroy(&mut self) -> Result<()> {
        self.stop();
        let name = self.state.name().to_string();
        let (disk, memory) = tokio::join!(self.disk.destroy(), self.memory.destroy());

        let result = match (disk, memory) {
            (Ok(()), Ok(())) => Ok(()),
            (disk, memory) => Err(MirrorError::Destroy {
                disk: disk.err(),
                memory: memory.err(),
            }),
        };
        match &result {
            Ok(()) => info!(name = %name, "Destroyed local stores"),
            Err(e) => error!(name = %name, error = %e, "Failed to destroy local stores"),
        }
        metrics::record_destroy(&name, result.is_ok());
        result
    }

    /// Publish the status snapshot, then the events.
    ///
    /// The snapshot goes first so listeners reading `sync_status()` from a
    /// callback see the state the event describes.
    fn commit(&self, events: Vec<MirrorEvent>) {
        let snapshot = self.state.snapshot();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        if changed {
            metrics::set_session_status(self.state.name(), snapshot.status);
        }

        for event in events {
            let topic = event.topic();
            debug!(name = %self.state.name(), topic, phase = ?event.phase(), "Publishing event");
            metrics::record_event_published(self.state.name(), topic);
            self.bus.broadcast(topic, &event);
        }
    }
}
