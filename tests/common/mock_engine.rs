//! Scripted mock StoreEngine for testing.
//!
//! Records every call (opens, replications, syncs) in order for assertions.
//! Syncs do nothing on their own: a test drives each one through the
//! [`SyncController`] the mock keeps, emitting exactly the events it wants.
//!
//! # Example
//! ```rust,ignore
//! let engine = Arc::new(MockEngine::new());
//! let h = harness(Arc::clone(&engine), true, remote_config("notes"));
//!
//! engine.wait_for_syncs(1).await;
//! engine.sync_at(0).emit(SyncEvent::Paused);
//!
//! assert!(engine.calls().contains(&Call::Sync { remote: REMOTE_URL.into(), local: "notes_mem".into() }));
//! ```

use mirror_engine::store::{BoxFuture, SyncController};
use mirror_engine::{
    Document, ReplicationReport, Store, StoreEngine, StoreError, StoreInfo, StoreOptions, SyncHandle, SyncOptions,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::{eventually, WAIT};

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open { name: String },
    ReplicateOnce { source: String, target: String },
    ReplicateLive { source: String, target: String },
    Sync { remote: String, local: String },
}

/// Minimal document store.
pub struct MockStore {
    name: String,
    pub options: StoreOptions,
    docs: Mutex<BTreeMap<String, Document>>,
    fail_destroy: AtomicBool,
    destroyed: AtomicBool,
}

impl MockStore {
    fn new(name: &str, options: &StoreOptions) -> Self {
        Self {
            name: name.to_string(),
            options: options.clone(),
            docs: Mutex::new(BTreeMap::new()),
            fail_destroy: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Store for MockStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, id: &str) -> BoxFuture<'_, Option<Document>> {
        let doc = self.docs.lock().get(id).filter(|d| !d.deleted).cloned();
        Box::pin(async move { Ok(doc) })
    }

    fn put(&self, mut doc: Document) -> BoxFuture<'_, u64> {
        let mut docs = self.docs.lock();
        doc.rev = docs.get(&doc.id).map_or(0, |d| d.rev) + 1;
        let rev = doc.rev;
        docs.insert(doc.id.clone(), doc);
        Box::pin(async move { Ok(rev) })
    }

    fn remove(&self, id: &str) -> BoxFuture<'_, bool> {
        let removed = self.docs.lock().remove(id).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn all_docs(&self) -> BoxFuture<'_, Vec<Document>> {
        let docs = self.docs.lock().values().cloned().collect();
        Box::pin(async move { Ok(docs) })
    }

    fn info(&self) -> BoxFuture<'_, StoreInfo> {
        let doc_count = self.docs.lock().len();
        let name = self.name.clone();
        Box::pin(async move {
            Ok(StoreInfo {
                name,
                doc_count,
                update_seq: 0,
            })
        })
    }

    fn destroy(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_destroy.load(Ordering::SeqCst) {
                return Err(StoreError(format!("cannot remove {}", self.name)));
            }
            self.destroyed.store(true, Ordering::SeqCst);
            self.docs.lock().clear();
            Ok(())
        })
    }
}

/// Mock implementation of StoreEngine that records all calls.
#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<Call>>,
    stores: Mutex<HashMap<String, Arc<MockStore>>>,
    syncs: Mutex<Vec<Arc<SyncController>>>,
    sync_options: Mutex<Vec<SyncOptions>>,
    fail_bootstrap: AtomicBool,
    fail_open: Mutex<Option<String>>,
    bootstrap_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Failure Configuration
    // =========================================================================

    /// Make the disk → memory bootstrap fail.
    pub fn fail_bootstrap(&self) {
        self.fail_bootstrap.store(true, Ordering::SeqCst);
    }

    /// Make opening the named store fail (until cleared with `None`).
    pub fn fail_open(&self, name: Option<&str>) {
        *self.fail_open.lock() = name.map(str::to_string);
    }

    /// Make destroying the named store fail. The store must already be open.
    pub fn fail_destroy(&self, name: &str) {
        if let Some(store) = self.stores.lock().get(name) {
            store.fail_destroy.store(true, Ordering::SeqCst);
        }
    }

    /// Hold the bootstrap until the returned sender fires (or is dropped).
    pub fn gate_bootstrap(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.bootstrap_gate.lock() = Some(rx);
        tx
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn store(&self, name: &str) -> Option<Arc<MockStore>> {
        self.stores.lock().get(name).cloned()
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.lock().len()
    }

    /// Controller of the `index`-th sync ever attached.
    pub fn sync_at(&self, index: usize) -> Arc<SyncController> {
        Arc::clone(&self.syncs.lock()[index])
    }

    /// Options the `index`-th sync was started with.
    pub fn sync_options_at(&self, index: usize) -> SyncOptions {
        self.sync_options.lock()[index].clone()
    }

    pub fn latest_sync(&self) -> Arc<SyncController> {
        let syncs = self.syncs.lock();
        Arc::clone(syncs.last().expect("no sync attached"))
    }

    /// Syncs that have not been cancelled.
    pub fn live_syncs(&self) -> usize {
        self.syncs.lock().iter().filter(|s| !s.is_cancelled()).count()
    }

    pub async fn wait_for_syncs(&self, count: usize) {
        eventually(&format!("{count} syncs"), || self.sync_count() >= count).await;
    }

    pub async fn wait_cancelled(&self, index: usize) {
        let sync = self.sync_at(index);
        eventually(&format!("sync {index} cancelled"), || sync.is_cancelled()).await;
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl StoreEngine for MockEngine {
    type Store = MockStore;

    fn open(&self, name: &str, options: &StoreOptions) -> Result<Arc<MockStore>, StoreError> {
        self.record(Call::Open { name: name.to_string() });
        if self.fail_open.lock().as_deref() == Some(name) {
            return Err(StoreError(format!("{name} unreachable")));
        }
        let store = Arc::clone(
            self.stores
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MockStore::new(name, options))),
        );
        Ok(store)
    }

    fn replicate_once(&self, source: Arc<MockStore>, target: Arc<MockStore>) -> BoxFuture<'_, ReplicationReport> {
        self.record(Call::ReplicateOnce {
            source: source.name.clone(),
            target: target.name.clone(),
        });
        let gate = self.bootstrap_gate.lock().take();
        Box::pin(async move {
            if let Some(gate) = gate {
                let _ = tokio::time::timeout(WAIT, gate).await;
            }
            if self.fail_bootstrap.load(Ordering::SeqCst) {
                return Err(StoreError("disk store corrupted".to_string()));
            }
            let docs: Vec<Document> = source.docs.lock().values().cloned().collect();
            let written = docs.len();
            target.docs.lock().extend(docs.into_iter().map(|d| (d.id.clone(), d)));
            Ok(ReplicationReport {
                docs_read: written,
                docs_written: written,
                doc_write_failures: 0,
            })
        })
    }

    fn replicate_live(&self, source: Arc<MockStore>, target: Arc<MockStore>) {
        self.record(Call::ReplicateLive {
            source: source.name.clone(),
            target: target.name.clone(),
        });
    }

    fn sync(&self, remote: Arc<MockStore>, local: Arc<MockStore>, options: &SyncOptions) -> SyncHandle {
        self.record(Call::Sync {
            remote: remote.name.clone(),
            local: local.name.clone(),
        });
        self.sync_options.lock().push(options.clone());
        let (handle, controller) = SyncHandle::channel();
        self.syncs.lock().push(Arc::new(controller));
        handle
    }
}
