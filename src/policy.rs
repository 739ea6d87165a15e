// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Namespace caching policy.
//!
//! The set of namespaces is fixed when the process starts. Each one is
//! either write-back cached or written straight through to its backend
//! handle.

use std::collections::BTreeMap;

/// Immutable namespace → caching-enabled table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePolicy {
    caching: BTreeMap<String, bool>,
}

impl NamespacePolicy {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        Self {
            caching: entries.into_iter().map(|(name, on)| (name.into(), on)).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool {
        self.caching.contains_key(namespace)
    }

    /// `None` if the namespace is not registered.
    #[must_use]
    pub fn caching_enabled(&self, namespace: &str) -> Option<bool> {
        self.caching.get(namespace).copied()
    }

    /// Registered namespaces in sorted order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.caching.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.caching.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caching.is_empty()
    }
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::new([("services", true), ("sessions", true), ("audit", false)])
    }
}
