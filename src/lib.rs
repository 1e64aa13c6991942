//! # Mirror Engine
//!
//! A local-first mirror: the application reads and writes a fast in-memory
//! store that is kept durable on disk and, whenever connectivity allows,
//! synchronized bidirectionally with a remote store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          mirror session                              │
//! │                                                                      │
//! │   bootstrap (once)          live                 sync (when online)  │
//! │  ┌────────┐ ───────► ┌──────────────┐ ◄───────► ┌────────────────┐   │
//! │  │  disk  │          │    memory    │           │     remote     │   │
//! │  │ <name> │ ◄─────── │ <name>_mem   │           │ (lazy, by URL) │   │
//! │  └────────┘   live   └──────────────┘           └────────────────┘   │
//! │                             ▲                                        │
//! │                             │ get / put / remove                     │
//! │                       MirrorHandle ──► start_sync / stop_sync        │
//! └──────────────────────────────────────────────────────────────────────┘
//!          │ status events (mirror:update / mirror:error / mirror:denied)
//!          ▼
//!      EventBus
//! ```
//!
//! The replication itself is delegated to a [`StoreEngine`]. The session only
//! decides *when* to sync, based on explicit start/stop requests and the
//! process-wide [`ConnectivityMonitor`], and reports what happens as
//! [`MirrorEvent`]s.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_engine::{create_mirror, ConnectivityMonitor, LocalEventBus, MemoryEngine, MirrorConfig};
//!
//! #[tokio::main]
//! async fn main() -> mirror_engine::Result<()> {
//!     let engine = Arc::new(MemoryEngine::new());
//!     let connectivity = Arc::new(ConnectivityMonitor::new(true));
//!     let bus = Arc::new(LocalEventBus::new());
//!     let mut updates = bus.subscribe(mirror_engine::events::TOPIC_UPDATE);
//!
//!     let config = MirrorConfig::new(Some("notes"), Some("https://db.example.com/notes"), None);
//!     let mirror = create_mirror(engine, Arc::clone(&connectivity), bus, config)?;
//!
//!     let status = mirror.wait_ready().await?;
//!     println!("ready: {}", status.status);
//!
//!     connectivity.set_online(false); // sync pauses, status becomes offline
//!     connectivity.set_online(true);  // sync resumes
//!
//!     while let Some(event) = updates.recv().await {
//!         println!("{:?} {:?}", event.phase(), event.status());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod memory;
pub mod metrics;
pub mod resilience;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use config::{Adapter, MirrorConfig, StoreOptions, SyncOptions};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use error::{MirrorError, Result};
pub use events::{DeniedEvent, EventBus, LocalEventBus, MirrorEvent, Phase, StatusEvent};
pub use memory::{MemoryEngine, MemoryStore};
pub use resilience::RetryConfig;
pub use session::{create_mirror, MirrorHandle, MirrorStatus, SyncState};
pub use store::{
    CompletionSummary, DirectionSummary, Document, ReplicationReport, Store, StoreEngine, StoreError,
    StoreInfo, SyncEvent, SyncFailure, SyncHandle,
};
