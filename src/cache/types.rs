// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache entry and flush report types.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

/// Returned by a buffered append once shutdown has sealed the cache.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("write-back cache is sealed for shutdown")]
pub struct CacheSealed;

/// Lookup key: namespace and key, compared by exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub namespace: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// Values known for one key.
///
/// `pending` is always a subset of `all_values`. A flushed value leaves
/// `pending` but stays in `all_values` so later lookups still see it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub(crate) all_values: HashSet<String>,
    pub(crate) pending: HashSet<String>,
}

impl CacheEntry {
    /// Insert a value; returns `true` if it was not already known.
    pub(crate) fn insert(&mut self, value: &str) -> bool {
        if self.all_values.contains(value) {
            return false;
        }
        self.all_values.insert(value.to_string());
        self.pending.insert(value.to_string());
        true
    }

    /// Replace everything with a value already persisted in the backend.
    pub(crate) fn replace_persisted(&mut self, value: &str) {
        self.all_values.clear();
        self.all_values.insert(value.to_string());
        self.pending.clear();
    }

    pub(crate) fn mark_flushed(&mut self, value: &str) {
        self.pending.remove(value);
    }

    /// All values concatenated without separator, sorted so the result is
    /// stable between calls.
    pub(crate) fn joined(&self) -> String {
        let mut values: Vec<&str> = self.all_values.iter().map(String::as_str).collect();
        values.sort_unstable();
        values.concat()
    }

    #[must_use]
    pub fn all_values(&self) -> &HashSet<String> {
        &self.all_values
    }

    #[must_use]
    pub fn pending(&self) -> &HashSet<String> {
        &self.pending
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Per-key outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyFlushStats {
    pub flushed: usize,
    pub total: usize,
}

impl KeyFlushStats {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.total - self.flushed
    }
}

impl std::fmt::Display for KeyFlushStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.flushed, self.total)
    }
}

/// Result of [`super::WriteBackCache::drain_pending`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub per_key: BTreeMap<CacheKey, KeyFlushStats>,
}

impl FlushReport {
    #[must_use]
    pub fn get(&self, namespace: &str, key: &str) -> Option<KeyFlushStats> {
        self.per_key.get(&CacheKey::new(namespace, key)).copied()
    }

    /// Values attempted
    #[must_use]
    pub fn total(&self) -> usize {
        self.per_key.values().map(|s| s.total).sum()
    }

    #[must_use]
    pub fn flushed(&self) -> usize {
        self.per_key.values().map(|s| s.flushed).sum()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.total() - self.flushed()
    }

    /// True if every attempted value reached the backend.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.per_key.is_empty()
    }
}
