//! The process-wide registry.
//!
//! [`init`] loads it once; [`shutdown`] writes it back if it has unsaved
//! changes. Statics are never dropped, so `shutdown` is the only teardown
//! save for the global instance.

use once_cell::sync::OnceCell;

use crate::error::CatalogResult;
use crate::registry::store::RegistryStore;
use crate::registry::Registry;

static REGISTRY: OnceCell<Registry> = OnceCell::new();

/// Opens the global registry from `store`. Later calls return the instance
/// created first and ignore their store.
pub fn init(store: impl RegistryStore + 'static) -> CatalogResult<&'static Registry> {
    if let Some(registry) = REGISTRY.get() {
        log::warn!("registry already initialised from {}", registry.location().display());
        return Ok(registry);
    }
    REGISTRY.get_or_try_init(|| Registry::open(store))
}

pub fn get() -> Option<&'static Registry> {
    REGISTRY.get()
}

/// Saves the global registry if dirty. A no-op before [`init`].
pub fn shutdown() -> CatalogResult<()> {
    match REGISTRY.get() {
        Some(registry) if registry.is_dirty() => registry.save(),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store::InMemoryStore;

    #[test]
    fn global_registry_is_initialised_once() {
        assert!(shutdown().is_ok());
        let first = init(InMemoryStore::new()).unwrap();
        let second = init(InMemoryStore::with_contents("<not-a-registry/>")).unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(std::ptr::eq(get().unwrap(), first));

        first.add_server(first.new_server("SrvA", "localhost", "")).unwrap();
        first.state().mark_dirty();
        shutdown().unwrap();
        assert!(!first.is_dirty());
    }
}
