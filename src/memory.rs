// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process store engine.
//!
//! [`MemoryEngine`] implements [`StoreEngine`] entirely in memory. Stores
//! are kept in a registry keyed by name, so opening the same name twice
//! (a remote URL shared by two sessions, say) yields the same data. The
//! `Disk` adapter is accepted but not persisted.
//!
//! Replication is revision based: a document is copied when the source
//! revision is higher than the target's. Each store publishes its writes on a
//! change feed that live replications and syncs follow.
//!
//! # Fault injection
//!
//! - [`MemoryStore::set_failure()`]: the store becomes unreachable for syncs.
//! - [`MemoryStore::set_denied()`]: writes replicated into the store are rejected.
//! - [`MemoryStore::require_credentials()`]: syncs through a handle opened
//!   with other credentials end with an `unauthorized` completion, the way
//!   some engines report authorization failures.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::config::{StoreOptions, SyncOptions};
use crate::store::{
    BoxFuture, CompletionSummary, Document, DirectionSummary, ReplicationReport, Store, StoreEngine,
    StoreError, StoreInfo, StoreResult, SyncController, SyncEvent, SyncFailure, SyncHandle,
};

/// Capacity of each store's change feed.
const CHANGE_FEED_CAPACITY: usize = 1024;

type Registry = Mutex<HashMap<String, Arc<StoreData>>>;

/// Shared data behind every handle to one named store.
struct StoreData {
    name: String,
    docs: RwLock<BTreeMap<String, Document>>,
    update_seq: Mutex<u64>,
    changes: broadcast::Sender<Document>,
    destroyed: watch::Sender<bool>,
    failure: RwLock<Option<SyncFailure>>,
    denied: RwLock<Option<SyncFailure>>,
    credentials: RwLock<Option<(String, String)>>,
}

impl StoreData {
    fn new(name: &str) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let (destroyed, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            docs: RwLock::new(BTreeMap::new()),
            update_seq: Mutex::new(0),
            changes,
            destroyed,
            failure: RwLock::new(None),
            denied: RwLock::new(None),
            credentials: RwLock::new(None),
        }
    }

    fn is_destroyed(&self) -> bool {
        *self.destroyed.borrow()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_destroyed() {
            return Err(StoreError(format!("store {} has been destroyed", self.name)));
        }
        Ok(())
    }

    /// Write a document at a new revision.
    fn write(&self, mut doc: Document) -> StoreResult<u64> {
        self.ensure_open()?;
        let rev = {
            let mut docs = self.docs.write();
            let rev = docs.get(&doc.id).map_or(0, |d| d.rev) + 1;
            doc.rev = rev;
            docs.insert(doc.id.clone(), doc.clone());
            rev
        };
        self.bump_and_publish(doc);
        Ok(rev)
    }

    /// Store a replicated document if it is newer than ours.
    fn apply(&self, doc: &Document) -> bool {
        if self.is_destroyed() {
            return false;
        }
        {
            let mut docs = self.docs.write();
            if docs.get(&doc.id).is_some_and(|current| current.rev >= doc.rev) {
                return false;
            }
            docs.insert(doc.id.clone(), doc.clone());
        }
        self.bump_and_publish(doc.clone());
        true
    }

    fn bump_and_publish(&self, doc: Document) {
        *self.update_seq.lock() += 1;
        // No subscribers is fine.
        let _ = self.changes.send(doc);
    }

    fn rev_of(&self, id: &str) -> u64 {
        self.docs.read().get(id).map_or(0, |d| d.rev)
    }

    /// Documents (tombstones included) newer here than in `target`.
    fn newer_than(&self, target: &StoreData) -> Vec<Document> {
        // Never hold both stores' locks at once.
        let snapshot: Vec<Document> = self.docs.read().values().cloned().collect();
        snapshot
            .into_iter()
            .filter(|doc| doc.rev > target.rev_of(&doc.id))
            .collect()
    }
}

/// A handle to a store opened by [`MemoryEngine`].
pub struct MemoryStore {
    data: Arc<StoreData>,
    options: StoreOptions,
    registry: std::sync::Weak<Registry>,
}

impl MemoryStore {
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn is_destroyed(&self) -> bool {
        self.data.is_destroyed()
    }

    /// Make the store unreachable for syncs (`None` restores it).
    pub fn set_failure(&self, failure: Option<SyncFailure>) {
        *self.data.failure.write() = failure;
    }

    /// Reject documents replicated into this store (`None` accepts again).
    pub fn set_denied(&self, denied: Option<SyncFailure>) {
        *self.data.denied.write() = denied;
    }

    /// Only syncs through handles opened with these credentials are authorized.
    pub fn require_credentials(&self, username: &str, password: &str) {
        *self.data.credentials.write() = Some((username.to_string(), password.to_string()));
    }

    fn authorized(&self) -> bool {
        match &*self.data.credentials.read() {
            None => true,
            Some((user, pass)) => {
                self.options.username.as_deref() == Some(user.as_str())
                    && self.options.password.as_deref() == Some(pass.as_str())
            }
        }
    }

    fn failure(&self) -> Option<SyncFailure> {
        self.data.failure.read().clone()
    }

    fn denied(&self) -> Option<SyncFailure> {
        self.data.denied.read().clone()
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.data.name
    }

    fn get(&self, id: &str) -> BoxFuture<'_, Option<Document>> {
        let id = id.to_string();
        Box::pin(async move {
            self.data.ensure_open()?;
            Ok(self.data.docs.read().get(&id).filter(|d| !d.deleted).cloned())
        })
    }

    fn put(&self, doc: Document) -> BoxFuture<'_, u64> {
        Box::pin(async move { self.data.write(doc) })
    }

    fn remove(&self, id: &str) -> BoxFuture<'_, bool> {
        let id = id.to_string();
        Box::pin(async move {
            self.data.ensure_open()?;
            let existing = self.data.docs.read().get(&id).filter(|d| !d.deleted).cloned();
            match existing {
                Some(mut doc) => {
                    doc.deleted = true;
                    doc.body = serde_json::Value::Null;
                    self.data.write(doc)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn all_docs(&self) -> BoxFuture<'_, Vec<Document>> {
        Box::pin(async move {
            self.data.ensure_open()?;
            Ok(self.data.docs.read().values().filter(|d| !d.deleted).cloned().collect())
        })
    }

    fn info(&self) -> BoxFuture<'_, StoreInfo> {
        Box::pin(async move {
            self.data.ensure_open()?;
            let doc_count = self.data.docs.read().values().filter(|d| !d.deleted).count();
            Ok(StoreInfo {
                name: self.data.name.clone(),
                doc_count,
                update_seq: *self.data.update_seq.lock(),
            })
        })
    }

    fn destroy(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.data.ensure_open()?;
            self.data.docs.write().clear();
            self.data.destroyed.send_replace(true);
            if let Some(registry) = self.registry.upgrade() {
                let mut registry = registry.lock();
                if registry.get(&self.data.name).is_some_and(|d| Arc::ptr_eq(d, &self.data)) {
                    registry.remove(&self.data.name);
                }
            }
            debug!(store = %self.data.name, "Store destroyed");
            Ok(())
        })
    }
}

/// In-process [`StoreEngine`].
#[derive(Default)]
pub struct MemoryEngine {
    registry: Arc<Registry>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all live stores.
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl StoreEngine for MemoryEngine {
    type Store = MemoryStore;

    fn open(&self, name: &str, options: &StoreOptions) -> StoreResult<Arc<MemoryStore>> {
        if name.is_empty() {
            return Err(StoreError("store name must not be empty".to_string()));
        }
        let data = Arc::clone(
            self.registry
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(StoreData::new(name))),
        );
        Ok(Arc::new(MemoryStore {
            data,
            options: options.clone(),
            registry: Arc::downgrade(&self.registry),
        }))
    }

    fn replicate_once(
        &self,
        source: Arc<MemoryStore>,
        target: Arc<MemoryStore>,
    ) -> BoxFuture<'_, ReplicationReport> {
        Box::pin(async move {
            source.data.ensure_open()?;
            target.data.ensure_open()?;
            let pending = source.data.newer_than(&target.data);
            let docs_written = pending.iter().filter(|doc| target.data.apply(doc)).count();
            Ok(ReplicationReport {
                docs_read: pending.len(),
                docs_written,
                doc_write_failures: 0,
            })
        })
    }

    fn replicate_live(&self, source: Arc<MemoryStore>, target: Arc<MemoryStore>) {
        tokio::spawn(async move {
            let mut changes = source.data.changes.subscribe();
            let mut source_gone = source.data.destroyed.subscribe();
            let mut target_gone = target.data.destroyed.subscribe();

            for doc in source.data.newer_than(&target.data) {
                target.data.apply(&doc);
            }

            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Ok(doc) => {
                            target.data.apply(&doc);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            for doc in source.data.newer_than(&target.data) {
                                target.data.apply(&doc);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = source_gone.wait_for(|gone| *gone) => break,
                    _ = target_gone.wait_for(|gone| *gone) => break,
                }
            }
            debug!(source = %source.data.name, target = %target.data.name, "Live replication ended");
        });
    }

    fn sync(&self, remote: Arc<MemoryStore>, local: Arc<MemoryStore>, options: &SyncOptions) -> SyncHandle {
        let (handle, controller) = SyncHandle::channel();
        let task = SyncTask {
            remote,
            local,
            options: options.clone(),
            summary: CompletionSummary {
                push: Some(DirectionSummary::default()),
                pull: Some(DirectionSummary::default()),
            },
            rejected: HashMap::new(),
        };
        tokio::spawn(task.run(controller));
        handle
    }
}

/// Why a sync round could not complete.
enum RoundError {
    /// Transport-level failure; may be retried.
    Unavailable(SyncFailure),
    /// Credentials rejected; retrying cannot help.
    Unauthorized(SyncFailure),
}

/// State of one bidirectional sync.
struct SyncTask {
    remote: Arc<MemoryStore>,
    local: Arc<MemoryStore>,
    options: SyncOptions,
    summary: CompletionSummary,
    /// Document revisions the remote already denied; not offered again.
    rejected: HashMap<String, u64>,
}

impl SyncTask {
    async fn run(mut self, mut controller: SyncController) {
        let retry = self.options.retry_config();
        let mut remote_changes = self.remote.data.changes.subscribe();
        let mut local_changes = self.local.data.changes.subscribe();
        let mut remote_gone = self.remote.data.destroyed.subscribe();
        let mut local_gone = self.local.data.destroyed.subscribe();
        let mut failures = 0usize;
        let mut announce_paused = true;

        loop {
            if controller.is_cancelled() || self.remote.is_destroyed() || self.local.is_destroyed() {
                break;
            }
            if controller.is_detached() {
                debug!(remote = %self.remote.data.name, "Sync detached, winding down");
                break;
            }

            match self.round(&controller) {
                Ok(transferred) => {
                    if transferred || announce_paused {
                        controller.emit(SyncEvent::Paused);
                    }
                    failures = 0;
                    announce_paused = false;
                }
                Err(RoundError::Unauthorized(failure)) => {
                    warn!(remote = %self.remote.data.name, "Sync unauthorized");
                    self.record_error(failure);
                    break;
                }
                Err(RoundError::Unavailable(failure)) => {
                    failures += 1;
                    controller.emit(SyncEvent::Error(failure.clone()));
                    match &retry {
                        Some(retry) if retry.should_retry(failures) => {
                            let delay = retry.delay_for_attempt(failures);
                            debug!(remote = %self.remote.data.name, failures, delay_ms = delay.as_millis() as u64, "Retrying sync");
                            announce_paused = true;
                            tokio::select! {
                                _ = controller.cancelled() => break,
                                _ = tokio::time::sleep(delay) => continue,
                            }
                        }
                        _ => {
                            self.record_error(failure);
                            break;
                        }
                    }
                }
            }

            if !self.options.live {
                break;
            }

            tokio::select! {
                _ = controller.cancelled() => break,
                _ = remote_changes.recv() => {}
                _ = local_changes.recv() => {}
                _ = remote_gone.wait_for(|gone| *gone) => break,
                _ = local_gone.wait_for(|gone| *gone) => break,
            }
        }

        debug!(remote = %self.remote.data.name, local = %self.local.data.name, "Sync complete");
        controller.emit(SyncEvent::Complete(self.summary));
    }

    /// Push then pull. Returns whether anything was transferred.
    fn round(&mut self, controller: &SyncController) -> Result<bool, RoundError> {
        if let Some(failure) = self.remote.failure() {
            return Err(RoundError::Unavailable(failure));
        }
        if !self.remote.authorized() {
            return Err(RoundError::Unauthorized(
                SyncFailure::unauthorized()
                    .with_reason("Name or password is incorrect.")
                    .with_status(401),
            ));
        }

        let rejected = &self.rejected;
        let push: Vec<Document> = self
            .local
            .data
            .newer_than(&self.remote.data)
            .into_iter()
            .filter(|doc| rejected.get(&doc.id) != Some(&doc.rev))
            .collect();
        let pull = self.remote.data.newer_than(&self.local.data);
        if push.is_empty() && pull.is_empty() {
            return Ok(false);
        }

        controller.emit(SyncEvent::Active);

        let denied = self.remote.denied();
        for doc in push {
            let stats = self.summary.push.get_or_insert_with(DirectionSummary::default);
            stats.docs_read += 1;
            if let Some(failure) = &denied {
                stats.doc_write_failures += 1;
                self.rejected.insert(doc.id.clone(), doc.rev);
                controller.emit(SyncEvent::Denied(failure.clone()));
                continue;
            }
            if self.remote.data.apply(&doc) {
                stats.docs_written += 1;
            }
        }

        for doc in pull {
            let stats = self.summary.pull.get_or_insert_with(DirectionSummary::default);
            stats.docs_read += 1;
            if self.local.data.apply(&doc) {
                stats.docs_written += 1;
            }
        }

        self.finish_ok();
        Ok(true)
    }

    fn finish_ok(&mut self) {
        for stats in [&mut self.summary.push, &mut self.summary.pull].into_iter().flatten() {
            stats.ok = stats.errors.is_empty();
        }
    }

    fn record_error(&mut self, failure: SyncFailure) {
        for stats in [&mut self.summary.push, &mut self.summary.pull].into_iter().flatten() {
            stats.ok = false;
            stats.errors.push(failure.clone());
        }
    }
}
