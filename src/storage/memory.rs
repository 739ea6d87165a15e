// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{Backend, BackendError, BackendHandle, OpenMode};

#[derive(Debug, Default, Clone)]
struct NamespaceData {
    /// Values per key in append order
    records: std::collections::HashMap<String, Vec<String>>,
    finished: bool,
}

impl NamespaceData {
    fn has_data(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Process-local backend.
///
/// All handles opened from the same `MemoryBackend` (and its clones) share
/// one store, so data appended through a write handle is visible to a read
/// handle opened after `finish`.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<DashMap<String, NamespaceData>>,
    appends: Arc<AtomicU64>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All values stored under `key`, in append order.
    #[must_use]
    pub fn values(&self, namespace: &str, key: &str) -> Vec<String> {
        self.data
            .get(namespace)
            .and_then(|ns| ns.records.get(key).cloned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_finished(&self, namespace: &str) -> bool {
        self.data.get(namespace).map(|ns| ns.finished).unwrap_or(false)
    }

    /// Number of successful appends across all handles
    #[must_use]
    pub fn append_count(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open(&self, namespace: &str, mode: OpenMode) -> Result<Arc<dyn BackendHandle>, BackendError> {
        if namespace.is_empty() {
            return Err(BackendError::Open {
                namespace: namespace.to_string(),
                reason: "empty namespace name".to_string(),
            });
        }

        match mode {
            OpenMode::Write => {
                // Reopening for write unseals the directory until the next finish
                self.data.entry(namespace.to_string()).or_default().finished = false;
            }
            OpenMode::Read => {
                if let Some(ns) = self.data.get(namespace) {
                    if ns.has_data() && !ns.finished {
                        return Err(BackendError::NotFinished {
                            namespace: namespace.to_string(),
                        });
                    }
                }
            }
        }

        Ok(Arc::new(MemoryHandle {
            namespace: namespace.to_string(),
            mode,
            data: Arc::clone(&self.data),
            appends: Arc::clone(&self.appends),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryHandle {
    namespace: String,
    mode: OpenMode,
    data: Arc<DashMap<String, NamespaceData>>,
    appends: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl MemoryHandle {
    fn check(&self, required: OpenMode) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed { namespace: self.namespace.clone() });
        }
        if self.mode != required {
            return Err(BackendError::WrongMode {
                namespace: self.namespace.clone(),
                mode: self.mode,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackendHandle for MemoryHandle {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    async fn append(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.check(OpenMode::Write)?;
        self.data
            .entry(self.namespace.clone())
            .or_default()
            .records
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        self.appends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check(OpenMode::Read)?;
        Ok(self
            .data
            .get(&self.namespace)
            .and_then(|ns| ns.records.get(key).map(|values| values.concat())))
    }

    async fn finish(&self) -> Result<(), BackendError> {
        self.check(OpenMode::Write)?;
        self.data.entry(self.namespace.clone()).or_default().finished = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
