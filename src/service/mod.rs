// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Service facade.
//!
//! Implements the externally visible `append` / `append_batch` / `get`
//! contract on top of the write-back cache, the namespace policy and the
//! backend handles, and enforces the process [`Mode`]:
//!
//! | Mode        | append / append_batch | get        |
//! |-------------|-----------------------|------------|
//! | `WriteOnly` | allowed               | WrongMode  |
//! | `ReadOnly`  | WrongMode             | allowed    |

mod types;

pub use types::{BatchResult, FailureKind, Mode, ServiceError};

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::WriteBackCache;
use crate::policy::NamespacePolicy;
use crate::registry::HandleRegistry;
use crate::storage::traits::BackendHandle;

const UNKNOWN_NAMESPACE_LABEL: &str = "unknown";

/// Request-facing front of the gateway. `Send + Sync`; share it via `Arc`.
pub struct CacheService {
    mode: Mode,
    policy: NamespacePolicy,
    handles: Arc<HandleRegistry>,
    cache: Arc<WriteBackCache>,
}

impl CacheService {
    pub fn new(
        mode: Mode,
        policy: NamespacePolicy,
        handles: Arc<HandleRegistry>,
        cache: Arc<WriteBackCache>,
    ) -> Self {
        Self { mode, policy, handles, cache }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn policy(&self) -> &NamespacePolicy {
        &self.policy
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<WriteBackCache> {
        &self.cache
    }

    /// Append a value under `namespace`/`key`.
    ///
    /// Cached namespaces buffer the value and return at once; others write
    /// through to the backend. Returns `true` if the value was new (always
    /// `true` for write-through namespaces).
    #[tracing::instrument(skip(self, value), fields(value_len = value.len()))]
    pub async fn append(&self, namespace: &str, key: &str, value: &str) -> Result<bool, ServiceError> {
        let start = Instant::now();
        let result = self.append_inner(namespace, key, value).await;
        record_outcome(self.metric_label(namespace), "append", &result, start);
        result
    }

    async fn append_inner(&self, namespace: &str, key: &str, value: &str) -> Result<bool, ServiceError> {
        if self.mode == Mode::ReadOnly {
            return Err(ServiceError::WrongMode { operation: "append", mode: self.mode });
        }
        self.ensure_open("append")?;
        let caching = self
            .policy
            .caching_enabled(namespace)
            .ok_or_else(|| ServiceError::unknown_namespace(namespace))?;

        if caching {
            let fresh = self
                .cache
                .buffer_append(namespace, key, value)
                .map_err(|_| ServiceError::ShuttingDown { operation: "append" })?;
            debug!(fresh, "Buffered append");
            return Ok(fresh);
        }

        let handle = self.handle(namespace)?;
        self.cache
            .direct_append(handle.as_ref(), key, value)
            .await
            .map_err(|source| ServiceError::BackendWrite {
                namespace: namespace.to_string(),
                source,
            })?;
        debug!("Direct append");
        Ok(true)
    }

    /// Append `values[i]` under `namespaces[i]`/`keys[i]` in index order.
    ///
    /// Not atomic: the first failing item stops the batch and earlier items
    /// stay applied. The error reports how many were applied.
    #[tracing::instrument(skip_all, fields(size = values.len()))]
    pub async fn append_batch(
        &self,
        namespaces: &[String],
        keys: &[String],
        values: &[String],
    ) -> Result<BatchResult, ServiceError> {
        if namespaces.len() != keys.len() || keys.len() != values.len() {
            crate::metrics::record_operation("batch", "append_batch", "rejected");
            return Err(ServiceError::BatchSizeMismatch {
                namespaces: namespaces.len(),
                keys: keys.len(),
                values: values.len(),
            });
        }
        if self.mode == Mode::ReadOnly {
            crate::metrics::record_operation("batch", "append_batch", "rejected");
            return Err(ServiceError::WrongMode { operation: "append_batch", mode: self.mode });
        }
        if let Err(e) = self.ensure_open("append_batch") {
            crate::metrics::record_operation("batch", "append_batch", "rejected");
            return Err(e);
        }

        let mut result = BatchResult { applied: 0, duplicates: 0 };
        for ((namespace, key), value) in namespaces.iter().zip(keys).zip(values) {
            match self.append(namespace, key, value).await {
                Ok(true) => result.applied += 1,
                Ok(false) => {
                    result.applied += 1;
                    result.duplicates += 1;
                }
                Err(e) => {
                    crate::metrics::record_operation("batch", "append_batch", "aborted");
                    return Err(ServiceError::BatchAborted {
                        applied: result.applied,
                        source: Box::new(e),
                    });
                }
            }
        }
        crate::metrics::record_operation("batch", "append_batch", "success");
        Ok(result)
    }

    /// Read the value for `namespace`/`key`.
    ///
    /// Cached namespaces answer from memory when the key is known; otherwise
    /// the backend is asked and, for cached namespaces, the result is kept.
    /// A key the backend has never seen yields an empty string.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, namespace: &str, key: &str) -> Result<String, ServiceError> {
        let start = Instant::now();
        let result = self.get_inner(namespace, key).await;
        record_outcome(self.metric_label(namespace), "get", &result, start);
        result
    }

    async fn get_inner(&self, namespace: &str, key: &str) -> Result<String, ServiceError> {
        if self.mode == Mode::WriteOnly {
            return Err(ServiceError::WrongMode { operation: "get", mode: self.mode });
        }
        self.ensure_open("get")?;
        let caching = self
            .policy
            .caching_enabled(namespace)
            .ok_or_else(|| ServiceError::unknown_namespace(namespace))?;

        if caching {
            if let Some(value) = self.cache.lookup(namespace, key) {
                debug!("Cache hit");
                return Ok(value);
            }
        }

        let handle = self.handle(namespace)?;
        let stored = handle.get(key).await.map_err(|source| ServiceError::BackendRead {
            namespace: namespace.to_string(),
            source,
        })?;

        match stored {
            Some(value) => {
                if caching {
                    self.cache.backfill(namespace, key, &value);
                }
                debug!(caching, "Backend hit");
                Ok(value)
            }
            None => {
                debug!("Backend miss");
                Ok(String::new())
            }
        }
    }

    /// Shutdown seals the cache before it drains and closes the handles.
    fn ensure_open(&self, operation: &'static str) -> Result<(), ServiceError> {
        if self.cache.is_sealed() {
            return Err(ServiceError::ShuttingDown { operation });
        }
        Ok(())
    }

    /// Namespace label for metrics. Unregistered names share one label so
    /// clients cannot mint new series.
    fn metric_label<'a>(&self, namespace: &'a str) -> &'a str {
        if self.policy.contains(namespace) {
            namespace
        } else {
            UNKNOWN_NAMESPACE_LABEL
        }
    }

    fn handle(&self, namespace: &str) -> Result<&Arc<dyn BackendHandle>, ServiceError> {
        // Every registered namespace gets a handle at startup
        self.handles
            .get(namespace)
            .ok_or_else(|| ServiceError::unknown_namespace(namespace))
    }
}

fn record_outcome<T>(namespace: &str, operation: &str, result: &Result<T, ServiceError>, start: Instant) {
    let status = match result {
        Ok(_) => "success",
        Err(e) => e.kind().code(),
    };
    crate::metrics::record_operation(namespace, operation, status);
    crate::metrics::record_latency(operation, start.elapsed());
}
