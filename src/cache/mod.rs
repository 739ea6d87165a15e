// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-back cache.
//!
//! Appends to cached namespaces land here and are acknowledged immediately;
//! [`WriteBackCache::drain_pending`] later pushes them to the backend.
//!
//! # Locking
//!
//! A single `parking_lot::Mutex` guards the whole entry map. Every operation
//! holds it only for in-memory work and never across an `.await`. A drain
//! copies the pending values out, releases the lock, talks to the backend,
//! then retakes the lock per key to clear what was written:
//!
//! ```text
//! lock ── snapshot pending ── unlock
//!                               │
//!                  backend.append(v) for every value (no lock held)
//!                               │
//! lock ── remove flushed values from pending ── unlock   (per key)
//! ```
//!
//! A per-key or sharded map would cut contention between the drain and
//! request handlers; at the expected key counts one lock is enough.
//!
//! Entries are never evicted.

mod types;

pub use types::{CacheEntry, CacheKey, CacheSealed, FlushReport, KeyFlushStats};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::registry::HandleRegistry;
use crate::storage::traits::{BackendError, BackendHandle};

/// Entry map shared by request handlers and the flush task.
#[derive(Debug, Default)]
pub struct WriteBackCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    /// Serializes drains so a value is never written by two drains at once
    drain_guard: tokio::sync::Mutex<()>,
    /// Set once shutdown begins; only written with `entries` locked
    sealed: AtomicBool,
}

impl WriteBackCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a value in memory. No backend I/O.
    ///
    /// Returns `true` if the value was new for this key and is now pending;
    /// `false` if it was already known (flushed or not). Fails once the
    /// cache is sealed.
    pub fn buffer_append(&self, namespace: &str, key: &str, value: &str) -> Result<bool, CacheSealed> {
        let mut entries = self.entries.lock();
        if self.sealed.load(Ordering::Acquire) {
            return Err(CacheSealed);
        }
        let entry = entries.entry(CacheKey::new(namespace, key)).or_default();
        Ok(entry.insert(value))
    }

    /// Refuse further buffered appends.
    ///
    /// Every append accepted before this call is visible to the next
    /// [`drain_pending`](Self::drain_pending) snapshot.
    pub fn seal(&self) {
        let _entries = self.entries.lock();
        self.sealed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Write straight to the backend, bypassing the cache.
    pub async fn direct_append(
        &self,
        handle: &dyn BackendHandle,
        key: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        handle.append(key, value).await
    }

    /// Concatenation of every known value for the key.
    ///
    /// Values are joined without a separator. The order is not part of the
    /// contract.
    #[must_use]
    pub fn lookup(&self, namespace: &str, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries.get(&CacheKey::new(namespace, key)).map(CacheEntry::joined)
    }

    /// Record a value read from the backend, replacing whatever was cached.
    pub fn backfill(&self, namespace: &str, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries
            .entry(CacheKey::new(namespace, key))
            .or_default()
            .replace_persisted(value);
    }

    /// Write every pending value to its namespace's backend handle.
    ///
    /// Failures are logged and counted; the value stays pending and is
    /// retried on the next drain. A drain always walks the full snapshot.
    pub async fn drain_pending(&self, handles: &HandleRegistry) -> FlushReport {
        let _drain = self.drain_guard.lock().await;
        let start = Instant::now();

        let snapshot = self.snapshot_pending();
        let mut report = FlushReport::default();

        for (cache_key, values) in snapshot {
            let mut flushed = Vec::with_capacity(values.len());

            match handles.get(&cache_key.namespace) {
                Some(handle) => {
                    for value in &values {
                        match handle.append(&cache_key.key, value).await {
                            Ok(()) => flushed.push(value.clone()),
                            Err(e) => {
                                warn!(key = %cache_key, error = %e, "Failed to flush value, will retry");
                            }
                        }
                    }
                }
                None => {
                    warn!(
                        namespace = %cache_key.namespace,
                        pending = values.len(),
                        "No backend handle for namespace, values stay pending"
                    );
                }
            }

            if !flushed.is_empty() {
                let mut entries = self.entries.lock();
                if let Some(entry) = entries.get_mut(&cache_key) {
                    for value in &flushed {
                        entry.mark_flushed(value);
                    }
                }
            }

            let stats = KeyFlushStats {
                flushed: flushed.len(),
                total: values.len(),
            };
            debug!(key = %cache_key, flushed = stats.flushed, total = stats.total, "Key flushed");
            report.per_key.insert(cache_key, stats);
        }

        let elapsed = start.elapsed();
        crate::metrics::record_flush_cycle(report.flushed(), report.failed(), elapsed);
        self.update_gauge_metrics();

        if !report.is_empty() {
            info!(
                keys = report.per_key.len(),
                flushed = report.flushed(),
                failed = report.failed(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Drain complete"
            );
        }
        report
    }

    fn snapshot_pending(&self) -> Vec<(CacheKey, Vec<String>)> {
        let entries = self.entries.lock();
        let mut snapshot: Vec<(CacheKey, Vec<String>)> = entries
            .iter()
            .filter(|(_, entry)| entry.has_pending())
            .map(|(k, entry)| {
                let mut values: Vec<String> = entry.pending.iter().cloned().collect();
                values.sort_unstable();
                (k.clone(), values)
            })
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Copy of one entry.
    #[must_use]
    pub fn entry(&self, namespace: &str, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(&CacheKey::new(namespace, key)).cloned()
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Values across all keys not yet written to the backend.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.lock().values().map(|e| e.pending.len()).sum()
    }

    pub fn update_gauge_metrics(&self) {
        let (entries, pending) = {
            let map = self.entries.lock();
            (map.len(), map.values().map(|e| e.pending.len()).sum::<usize>())
        };
        crate::metrics::set_cache_entries(entries);
        crate::metrics::set_pending_values(pending);
    }
}
