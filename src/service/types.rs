// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the service facade.

use thiserror::Error;

use crate::storage::traits::{BackendError, OpenMode};

/// Process-wide operating stance, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    ReadOnly,
    WriteOnly,
}

impl Mode {
    /// `true` → [`Mode::ReadOnly`]
    #[must_use]
    pub fn from_read_flag(read_mode: bool) -> Self {
        if read_mode {
            Self::ReadOnly
        } else {
            Self::WriteOnly
        }
    }

    /// Mode namespace handles are opened in.
    #[must_use]
    pub fn open_mode(self) -> OpenMode {
        match self {
            Self::ReadOnly => OpenMode::Read,
            Self::WriteOnly => OpenMode::Write,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "ReadOnly"),
            Self::WriteOnly => write!(f, "WriteOnly"),
        }
    }
}

/// Failure category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    UnknownNamespace,
    WrongMode,
    BatchSizeMismatch,
    BackendWrite,
    BackendRead,
    ShuttingDown,
}

impl FailureKind {
    /// Stable code used on the wire.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::UnknownNamespace => "UnknownNamespace",
            Self::WrongMode => "WrongMode",
            Self::BatchSizeMismatch => "BatchSizeMismatch",
            Self::BackendWrite => "BackendWriteFailure",
            Self::BackendRead => "BackendReadFailure",
            Self::ShuttingDown => "ShuttingDown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Typed operation failure. None of these are retried by the service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Unknown namespace '{namespace}'")]
    UnknownNamespace { namespace: String },

    #[error("{operation} is not allowed in {mode} mode")]
    WrongMode { operation: &'static str, mode: Mode },

    #[error("Batch arrays differ in length: {namespaces} namespaces, {keys} keys, {values} values")]
    BatchSizeMismatch { namespaces: usize, keys: usize, values: usize },

    #[error("Backend write to '{namespace}' failed: {source}")]
    BackendWrite { namespace: String, source: BackendError },

    #[error("Backend read from '{namespace}' failed: {source}")]
    BackendRead { namespace: String, source: BackendError },

    #[error("{operation} rejected: gateway is shutting down")]
    ShuttingDown { operation: &'static str },

    /// A batch item failed; items before it were applied and stay applied.
    #[error("Batch aborted after {applied} applied items: {source}")]
    BatchAborted { applied: usize, source: Box<ServiceError> },
}

impl ServiceError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownNamespace { .. } => FailureKind::UnknownNamespace,
            Self::WrongMode { .. } => FailureKind::WrongMode,
            Self::BatchSizeMismatch { .. } => FailureKind::BatchSizeMismatch,
            Self::BackendWrite { .. } => FailureKind::BackendWrite,
            Self::BackendRead { .. } => FailureKind::BackendRead,
            Self::ShuttingDown { .. } => FailureKind::ShuttingDown,
            Self::BatchAborted { source, .. } => source.kind(),
        }
    }

    /// Items applied before a batch failure, if this came from a batch.
    #[must_use]
    pub fn applied(&self) -> Option<usize> {
        match self {
            Self::BatchAborted { applied, .. } => Some(*applied),
            _ => None,
        }
    }

    pub(crate) fn unknown_namespace(namespace: &str) -> Self {
        Self::UnknownNamespace { namespace: namespace.to_string() }
    }
}

/// Successful batch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    /// Items appended to the cache or backend
    pub applied: usize,
    /// Items that were already cached with the same value
    pub duplicates: usize,
}
