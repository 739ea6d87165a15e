// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend handles, one per namespace, opened once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::traits::BackendHandle;

/// Read-only map from namespace to its open backend handle.
///
/// Built by the lifecycle controller after every namespace opened
/// successfully; nothing else closes the handles it holds.
#[derive(Clone, Default)]
pub struct HandleRegistry {
    handles: BTreeMap<String, Arc<dyn BackendHandle>>,
}

impl HandleRegistry {
    pub fn new(handles: impl IntoIterator<Item = Arc<dyn BackendHandle>>) -> Self {
        Self {
            handles: handles
                .into_iter()
                .map(|h| (h.namespace().to_string(), h))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, namespace: &str) -> Option<&Arc<dyn BackendHandle>> {
        self.handles.get(namespace)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn BackendHandle>)> {
        self.handles.iter().map(|(ns, h)| (ns.as_str(), h))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.handles.iter().map(|(ns, h)| (ns, h.mode())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::traits::{Backend, OpenMode};

    #[tokio::test]
    async fn test_registry_keys_by_namespace() {
        let backend = MemoryBackend::new();
        let a = backend.open("alpha", OpenMode::Write).await.unwrap();
        let b = backend.open("beta", OpenMode::Write).await.unwrap();

        let registry = HandleRegistry::new([a, b]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("alpha").unwrap().namespace(), "alpha");
        assert!(registry.get("gamma").is_none());

        let names: Vec<&str> = registry.iter().map(|(ns, _)| ns).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }
}
