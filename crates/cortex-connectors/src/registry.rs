//! Process-wide provider registry.
//!
//! `Registry::global()` is the process default; `Registry::new()` builds a
//! private instance for tests so a test suite never fights over global
//! mutable state.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::provider::Provider;

pub struct Registry {
    providers: RwLock<BTreeMap<&'static str, Arc<dyn Provider>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a provider under its own name. Panics on a duplicate
    /// registration — two providers sharing a name is a programming error,
    /// not a runtime condition to recover from.
    pub fn register(&self, provider: Arc<dyn Provider>) {
        let name = provider.name();
        let mut guard = self.providers.write().expect("registry lock poisoned");
        if guard.contains_key(name) {
            panic!("provider \"{name}\" registered twice");
        }
        guard.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().expect("registry lock poisoned").get(name).cloned()
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.providers.read().expect("registry lock poisoned").keys().copied().collect()
    }

    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.read().expect("registry lock poisoned").values().cloned().collect()
    }

    /// The process-wide singleton, populated with every bundled provider
    /// the first time it's touched.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let registry = Registry::new();
            crate::providers::register_all(&registry);
            registry
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::local_vault::LocalVaultProvider;

    #[test]
    fn duplicate_register_panics() {
        let registry = Registry::new();
        registry.register(Arc::new(LocalVaultProvider::new()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.register(Arc::new(LocalVaultProvider::new()));
        }));
        assert!(result.is_err());
    }

    #[test]
    fn global_registry_has_all_nine_providers() {
        let names = Registry::global().list();
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn list_is_sorted() {
        let names = Registry::global().list();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
