//! Adapter registry.
//!
//! An explicit name-to-adapter table built at process startup. Nothing
//! registers itself as a load-order side effect; the host application
//! lists its adapters once and hands the registry to the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::Adapter;

/// Explicit registration table mapping service names to adapters.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one adapter under its service name. Re-registering a
    /// name replaces the previous adapter.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.service_name(), adapter);
    }

    /// Looks up an adapter by service name.
    #[must_use]
    pub fn lookup(&self, service_name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(service_name).cloned()
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("service_names", &self.service_names())
            .finish()
    }
}
