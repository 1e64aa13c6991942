// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mirror engine.
//!
//! Steady-state conditions (offline, denied writes, remote sync errors) are
//! never returned as errors: they are published on the event bus. The
//! variants here cover the hard failure paths only.
//!
//! # Error Categories
//!
//! | Error Type | Description |
//! |------------|-------------|
//! | `Store` | Store engine call failed (open, read, write) |
//! | `Destroy` | One or both local stores could not be destroyed |
//! | `Config` | Configuration invalid |
//! | `Shutdown` | Session driver has exited (destroyed or dropped) |

use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while operating a mirror session.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// A store engine operation failed.
    #[error("Store error ({operation}): {message}")]
    Store {
        operation: String,
        message: String,
        #[source]
        source: Option<StoreError>,
    },

    /// Destroying the local stores failed.
    ///
    /// Either store may have been removed already; the fields name the
    /// stores whose removal failed.
    #[error("Destroy failed (disk: {}, memory: {})", describe(.disk), describe(.memory))]
    Destroy {
        disk: Option<StoreError>,
        memory: Option<StoreError>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session driver is no longer running.
    #[error("Mirror session has shut down")]
    Shutdown,
}

fn describe(err: &Option<StoreError>) -> String {
    match err {
        Some(e) => e.to_string(),
        None => "ok".to_string(),
    }
}

impl MirrorError {
    /// Create a store error with its source.
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }
}
