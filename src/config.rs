// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for a mirror session.
//!
//! Configuration is passed to [`create_mirror()`](crate::create_mirror) and can
//! be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use mirror_engine::config::MirrorConfig;
//!
//! let config = MirrorConfig {
//!     local_db_name: "notes".into(),
//!     remote_url: Some("https://db.example.com/notes".into()),
//!     ..Default::default()
//! };
//! assert_eq!(config.memory_store_name(), "notes_mem");
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! MirrorConfig
//! ├── local_db_name: String         # Disk store name; memory store is "<name>_mem"
//! ├── remote_url: Option<String>    # Remote endpoint; None = local only
//! ├── remote_options: StoreOptions  # Passed to the engine when opening the remote
//! └── sync: SyncOptions             # live / retry / backoff for the remote sync
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! local_db_name: "notes"
//! remote_url: "https://db.example.com/notes"
//! remote_options:
//!   username: "alice"
//!   password: "secret"
//! sync:
//!   retry: true
//!   retry_initial_delay: "1s"
//!   retry_max_delay: "10m"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::resilience::RetryConfig;

/// Name used when no local database name is configured.
pub const DEFAULT_LOCAL_DB_NAME: &str = "pouch";

/// Suffix appended to the local name for the volatile memory store.
pub const MEMORY_STORE_SUFFIX: &str = "_mem";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything needed to create one mirror session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Name of the durable store; also identifies the session in events.
    #[serde(default = "default_local_db_name")]
    pub local_db_name: String,

    /// Remote endpoint. When `None` the session never syncs remotely.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Options passed to the engine when the remote store is opened.
    #[serde(default)]
    pub remote_options: StoreOptions,

    /// Options for the remote sync.
    #[serde(default)]
    pub sync: SyncOptions,
}

fn default_local_db_name() -> String {
    DEFAULT_LOCAL_DB_NAME.to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            local_db_name: default_local_db_name(),
            remote_url: None,
            remote_options: StoreOptions::default(),
            sync: SyncOptions::default(),
        }
    }
}

impl MirrorConfig {
    /// Config from the factory arguments; empty or missing names fall back
    /// to [`DEFAULT_LOCAL_DB_NAME`].
    pub fn new(
        local_db_name: Option<&str>,
        remote_url: Option<&str>,
        remote_options: Option<StoreOptions>,
    ) -> Self {
        let local_db_name = match local_db_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => default_local_db_name(),
        };
        Self {
            local_db_name,
            remote_url: remote_url.filter(|url| !url.is_empty()).map(str::to_string),
            remote_options: remote_options.unwrap_or_default(),
            sync: SyncOptions::default(),
        }
    }

    /// Local-only config for testing, with fast retry.
    pub fn for_testing(local_db_name: &str) -> Self {
        Self {
            local_db_name: local_db_name.to_string(),
            remote_url: None,
            remote_options: StoreOptions::default(),
            sync: SyncOptions::testing(),
        }
    }

    /// Attach a remote endpoint.
    pub fn with_remote(mut self, remote_url: impl Into<String>) -> Self {
        self.remote_url = Some(remote_url.into());
        self
    }

    /// Name of the session (the durable store name).
    pub fn name(&self) -> &str {
        &self.local_db_name
    }

    /// Name of the volatile memory store.
    pub fn memory_store_name(&self) -> String {
        format!("{}{}", self.local_db_name, MEMORY_STORE_SUFFIX)
    }

    /// Options used to open the memory store.
    pub fn memory_store_options(&self) -> StoreOptions {
        StoreOptions::with_adapter(Adapter::Memory)
    }

    /// Options used to open the disk store.
    pub fn disk_store_options(&self) -> StoreOptions {
        StoreOptions::with_adapter(Adapter::Disk)
    }

    /// Reject configs that cannot produce a working session.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.local_db_name.trim().is_empty() {
            return Err("local_db_name must not be empty".to_string());
        }
        if let Some(url) = &self.remote_url {
            if url.trim().is_empty() {
                return Err("remote_url must not be empty when set".to_string());
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreOptions: how the engine opens a store
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage backend requested from the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adapter {
    /// Volatile, in-memory store.
    Memory,
    /// Durable, on-disk store.
    Disk,
    /// Remote store addressed by URL.
    #[default]
    Remote,
}

/// Options passed to [`StoreEngine::open()`](crate::store::StoreEngine::open).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    #[serde(default)]
    pub adapter: Adapter,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Extra request headers for remote adapters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl StoreOptions {
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncOptions: remote sync settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Options passed to [`StoreEngine::sync()`](crate::store::StoreEngine::sync).
///
/// Mirror sessions always start their sync with `live` and `retry` set; only
/// the delays are taken from here. Both flags still matter to callers driving
/// an engine directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Keep the sync open after catching up.
    #[serde(default = "default_true")]
    pub live: bool,

    /// Let the engine retry transport errors internally.
    #[serde(default = "default_true")]
    pub retry: bool,

    /// First retry delay as a duration string (e.g. "1s").
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay: String,

    /// Ceiling for the retry delay (e.g. "10m").
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: String,
}

fn default_true() -> bool {
    true
}

fn default_retry_initial_delay() -> String {
    "1s".to_string()
}

fn default_retry_max_delay() -> String {
    "10m".to_string()
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            live: true,
            retry: true,
            retry_initial_delay: default_retry_initial_delay(),
            retry_max_delay: default_retry_max_delay(),
        }
    }
}

impl SyncOptions {
    /// Fast retry for tests.
    pub fn testing() -> Self {
        Self {
            retry_initial_delay: "10ms".to_string(),
            retry_max_delay: "100ms".to_string(),
            ..Default::default()
        }
    }

    /// Parse the initial delay, falling back to 1 second.
    pub fn retry_initial_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.retry_initial_delay).unwrap_or(Duration::from_secs(1))
    }

    /// Parse the max delay, falling back to 10 minutes.
    pub fn retry_max_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.retry_max_delay).unwrap_or(Duration::from_secs(600))
    }

    /// Backoff schedule for engine-side retries.
    ///
    /// Returns `None` when retry is disabled.
    pub fn retry_config(&self) -> Option<RetryConfig> {
        if !self.retry {
            return None;
        }
        Some(RetryConfig {
            initial_delay: self.retry_initial_delay_duration(),
            max_delay: self.retry_max_delay_duration(),
            ..RetryConfig::live()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
