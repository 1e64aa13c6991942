// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store engine integration traits.
//!
//! The mirror never diffs, checkpoints or resolves conflicts itself. It drives
//! a [`StoreEngine`] that knows how to open stores, replicate them and run a
//! continuous bidirectional sync. This module defines that contract plus the
//! value types that cross it.
//!
//! # Sync handles
//!
//! A live sync is represented by a pair created with [`SyncHandle::channel()`]:
//!
//! ```text
//!   engine task                         mirror session
//! ┌───────────────┐  SyncEvent (mpsc) ┌──────────────┐
//! │SyncController │ ────────────────► │  SyncHandle  │
//! │               │ ◄──────────────── │              │
//! └───────────────┘   cancel (watch)  └──────────────┘
//! ```
//!
//! The engine emits `Active`/`Paused` while the sync runs and a final
//! `Complete` once it is cancelled. Cancelling is fire-and-forget.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::config::{StoreOptions, SyncOptions};

/// Result type for store engine operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Simplified error for store engine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// A document as seen through the store contract.
///
/// The revision is an opaque, monotonically increasing counter owned by the
/// engine. Writers pass the document they want stored; the engine assigns
/// the next revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub rev: u64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Document {
    pub fn new(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            rev: 0,
            deleted: false,
            body,
        }
    }
}

/// Summary information about a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub doc_count: usize,
    pub update_seq: u64,
}

/// Result of a one-shot replication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationReport {
    pub docs_read: usize,
    pub docs_written: usize,
    pub doc_write_failures: usize,
}

/// An error object reported by the engine for a failed sync or write.
///
/// `error` carries the machine-readable name (`unauthorized`, `forbidden`,
/// `not_found`, ...), `reason` the human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl SyncFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: None,
            status: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// The marker published when an authorization failure is detected in a
    /// completion summary.
    pub fn unauthorized() -> Self {
        Self::new("unauthorized")
    }

    /// True for `unauthorized` and `forbidden` failures.
    pub fn is_authorization(&self) -> bool {
        self.error == "unauthorized" || self.error == "forbidden"
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", self.error, reason),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Per-direction statistics in a completion summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionSummary {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub docs_read: usize,
    #[serde(default)]
    pub docs_written: usize,
    #[serde(default)]
    pub doc_write_failures: usize,
    #[serde(default)]
    pub errors: Vec<SyncFailure>,
}

/// Summary delivered with [`SyncEvent::Complete`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<DirectionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<DirectionSummary>,
}

impl CompletionSummary {
    /// Whether either direction recorded an `unauthorized`/`forbidden` error.
    ///
    /// Some engines report authorization failures through the completion
    /// path instead of the error path; the session uses this to normalize.
    pub fn has_authorization_failure(&self) -> bool {
        [&self.push, &self.pull]
            .into_iter()
            .flatten()
            .any(|dir| dir.errors.iter().any(SyncFailure::is_authorization))
    }
}

/// Notifications emitted by a live sync.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Data is being transferred.
    Active,
    /// Both sides caught up; the sync stays open.
    Paused,
    /// The sync closed (cancelled).
    Complete(CompletionSummary),
    /// The remote rejected an individual read or write.
    Denied(SyncFailure),
    /// Transport or engine error.
    Error(SyncFailure),
}

impl SyncEvent {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Active => "active",
            SyncEvent::Paused => "paused",
            SyncEvent::Complete(_) => "complete",
            SyncEvent::Denied(_) => "denied",
            SyncEvent::Error(_) => "error",
        }
    }
}

/// Orchestrator half of a live sync.
pub struct SyncHandle {
    events: mpsc::UnboundedReceiver<SyncEvent>,
    cancel: Arc<watch::Sender<bool>>,
}

/// Engine half of a live sync.
pub struct SyncController {
    events: mpsc::UnboundedSender<SyncEvent>,
    cancel_rx: watch::Receiver<bool>,
}

/// A cloneable cancel switch detached from the event receiver.
#[derive(Clone)]
pub struct SyncCanceller {
    cancel: Arc<watch::Sender<bool>>,
}

impl SyncHandle {
    /// Create a connected handle/controller pair.
    pub fn channel() -> (SyncHandle, SyncController) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            SyncHandle {
                events: events_rx,
                cancel: Arc::new(cancel_tx),
            },
            SyncController {
                events: events_tx,
                cancel_rx,
            },
        )
    }

    /// Ask the engine to stop. Does not wait for `Complete`.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Receive the next event. `None` once the engine dropped its controller.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Split into the cancel switch and the raw event receiver.
    pub fn into_parts(self) -> (SyncCanceller, mpsc::UnboundedReceiver<SyncEvent>) {
        (SyncCanceller { cancel: self.cancel }, self.events)
    }
}

impl SyncCanceller {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

impl SyncController {
    /// Emit an event to the orchestrator. Dropped silently if nobody listens.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Whether the orchestrator stopped listening for events.
    ///
    /// A superseded or abandoned sync is detached; further `emit` calls go
    /// nowhere and the engine may wind the sync down.
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }

    /// Resolve once cancellation was requested (or the handle was dropped).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancel_rx.borrow_and_update() {
                return;
            }
            if self.cancel_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A document store opened by an engine.
pub trait Store: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn get(&self, id: &str) -> BoxFuture<'_, Option<Document>>;

    /// Store a document, returning its new revision.
    fn put(&self, doc: Document) -> BoxFuture<'_, u64>;

    /// Mark a document deleted. Returns `false` if it did not exist.
    fn remove(&self, id: &str) -> BoxFuture<'_, bool>;

    fn all_docs(&self) -> BoxFuture<'_, Vec<Document>>;

    fn info(&self) -> BoxFuture<'_, StoreInfo>;

    /// Irrecoverably remove the store.
    fn destroy(&self) -> BoxFuture<'_, ()>;
}

/// Trait defining what the mirror needs from a replicating database engine.
///
/// This allows testing with scripted mocks and decouples the orchestrator
/// from any particular engine.
pub trait StoreEngine: Send + Sync + 'static {
    type Store: Store;

    /// Open (or create) a named store.
    fn open(&self, name: &str, options: &StoreOptions) -> StoreResult<Arc<Self::Store>>;

    /// Copy the current state of `source` into `target` once.
    fn replicate_once(
        &self,
        source: Arc<Self::Store>,
        target: Arc<Self::Store>,
    ) -> BoxFuture<'_, ReplicationReport>;

    /// Start a live one-directional replication that runs in the background
    /// for the lifetime of the stores.
    fn replicate_live(&self, source: Arc<Self::Store>, target: Arc<Self::Store>);

    /// Start a continuous bidirectional sync between `remote` and `local`.
    ///
    /// The engine owns the returned sync until it drops the
    /// [`SyncController`]. After a cancel it should emit a final
    /// [`SyncEvent::Complete`] and drop the controller. It may also stop
    /// early once [`SyncController::is_detached`] reports that nobody is
    /// listening any more.
    fn sync(
        &self,
        remote: Arc<Self::Store>,
        local: Arc<Self::Store>,
        options: &SyncOptions,
    ) -> SyncHandle;
}
