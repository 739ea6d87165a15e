// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Mode a namespace directory is opened in.
///
/// The backing store is append-only: a directory is written once, finalized,
/// and only then read. A handle never switches between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    Read,
    Write,
}

impl std::fmt::Display for OpenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to open namespace '{namespace}': {reason}")]
    Open { namespace: String, reason: String },
    #[error("Handle for '{namespace}' is open in {mode} mode")]
    WrongMode { namespace: String, mode: OpenMode },
    #[error("Handle for '{namespace}' is closed")]
    Closed { namespace: String },
    #[error("Namespace '{namespace}' has not been finalized for reading")]
    NotFinished { namespace: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Factory for namespace handles.
///
/// One call corresponds to creating a directory handle and opening it at the
/// path the backend derives from `namespace`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn open(&self, namespace: &str, mode: OpenMode) -> Result<Arc<dyn BackendHandle>, BackendError>;
}

/// An open namespace directory.
///
/// `finish` seals a write-mode directory so it can later be opened for
/// reading. `close` releases the handle; every call after it fails with
/// [`BackendError::Closed`].
#[async_trait]
pub trait BackendHandle: Send + Sync {
    fn namespace(&self) -> &str;
    fn mode(&self) -> OpenMode;

    async fn append(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Returns `Ok(None)` when the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    async fn finish(&self) -> Result<(), BackendError>;
    async fn close(&self) -> Result<(), BackendError>;
}
