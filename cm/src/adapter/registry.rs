//! AdapterRegistry - owns every object adapter of a communicator
//!
//! The registry is also the shutdown coordinator: `shutdown` deactivates all
//! adapters without blocking, and `wait_for_shutdown` parks callers until
//! shutdown has been requested and each adapter has finished deactivating.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use propstore::Properties;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::object_adapter::ObjectAdapter;
use crate::error::{CommunicatorError, Result};
use crate::proxy::Proxy;
use crate::resolver::ReferenceResolver;

#[derive(Default)]
struct RegistryInner {
    adapters: HashMap<String, Arc<ObjectAdapter>>,
    shutdown_requested: bool,
    destroyed: bool,
}

impl RegistryInner {
    fn check_open(&self) -> Result<()> {
        if self.destroyed {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        if self.shutdown_requested {
            return Err(CommunicatorError::ShutDown);
        }
        Ok(())
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.adapters.contains_key(name) {
            return Err(CommunicatorError::AlreadyRegistered {
                kind: "object adapter",
                id: name.to_string(),
            });
        }
        Ok(())
    }
}

/// Factory and owner of object adapters
pub struct AdapterRegistry {
    properties: Arc<Properties>,
    resolver: Arc<ReferenceResolver>,
    inner: Mutex<RegistryInner>,
    shutdown_signal: Condvar,
    self_ref: Weak<AdapterRegistry>,
}

impl AdapterRegistry {
    pub fn new(properties: Arc<Properties>, resolver: Arc<ReferenceResolver>) -> Arc<Self> {
        debug!("AdapterRegistry::new: called");
        Arc::new_cyclic(|self_ref| Self {
            properties,
            resolver,
            inner: Mutex::new(RegistryInner::default()),
            shutdown_signal: Condvar::new(),
            self_ref: self_ref.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register an adapter
    ///
    /// An empty name gets a UUID and reads no configuration. A named adapter
    /// reads `<name>.*`; callers that configure it write those properties
    /// before calling this.
    pub fn create_adapter(&self, name: &str, router: Option<Proxy>) -> Result<Arc<ObjectAdapter>> {
        debug!(%name, has_router = router.is_some(), "AdapterRegistry::create_adapter: called");
        {
            let inner = self.lock();
            inner.check_open()?;
            inner.check_unique(name)?;
        }

        let (adapter_name, configure) = if name.is_empty() {
            (Uuid::now_v7().to_string(), false)
        } else {
            (name.to_string(), true)
        };
        let adapter = ObjectAdapter::new(
            adapter_name.clone(),
            configure,
            router,
            &self.properties,
            Arc::clone(&self.resolver),
            self.self_ref.clone(),
        )?;

        let mut inner = self.lock();
        if let Err(e) = inner.check_open().and_then(|_| inner.check_unique(&adapter_name)) {
            drop(inner);
            warn!(%adapter_name, error = %e, "AdapterRegistry::create_adapter: lost race, discarding adapter");
            adapter.destroy();
            return Err(e);
        }
        inner.adapters.insert(adapter_name.clone(), Arc::clone(&adapter));
        info!(%adapter_name, "AdapterRegistry::create_adapter: registered");
        Ok(adapter)
    }

    pub fn find(&self, name: &str) -> Option<Arc<ObjectAdapter>> {
        self.lock().adapters.get(name).cloned()
    }

    /// Registered adapter names, sorted
    pub fn adapter_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().adapters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget `adapter` if it is the one registered under its name
    pub(crate) fn remove(&self, adapter: &ObjectAdapter) {
        let mut inner = self.lock();
        let registered = inner
            .adapters
            .get(adapter.name())
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), adapter));
        if registered {
            debug!(name = %adapter.name(), "AdapterRegistry::remove: removed");
            inner.adapters.remove(adapter.name());
        }
    }

    /// Deactivate every adapter; returns without waiting
    pub fn shutdown(&self) {
        let adapters: Vec<_> = {
            let mut inner = self.lock();
            if inner.shutdown_requested || inner.destroyed {
                return;
            }
            inner.shutdown_requested = true;
            inner.adapters.values().cloned().collect()
        };
        info!(count = adapters.len(), "AdapterRegistry::shutdown: deactivating adapters");
        self.shutdown_signal.notify_all();
        for adapter in adapters {
            adapter.deactivate();
        }
    }

    /// Block until shutdown was requested and every adapter is deactivated
    pub fn wait_for_shutdown(&self) {
        debug!("AdapterRegistry::wait_for_shutdown: called");
        let adapters: Vec<_> = {
            let inner = self.lock();
            let inner = self
                .shutdown_signal
                .wait_while(inner, |inner| !inner.shutdown_requested && !inner.destroyed)
                .unwrap_or_else(PoisonError::into_inner);
            inner.adapters.values().cloned().collect()
        };
        for adapter in adapters {
            adapter.wait_for_deactivate();
        }
        debug!("AdapterRegistry::wait_for_shutdown: released");
    }

    /// Shutdown was requested and every adapter has finished deactivating
    pub fn is_shutdown(&self) -> bool {
        let inner = self.lock();
        if inner.destroyed {
            return true;
        }
        inner.shutdown_requested && inner.adapters.values().all(|a| a.is_deactivated())
    }

    /// Shut down, wait, then destroy every adapter
    pub fn destroy(&self) {
        let adapters: Vec<_> = {
            let mut inner = self.lock();
            if inner.destroyed {
                return;
            }
            inner.shutdown_requested = true;
            inner.destroyed = true;
            inner.adapters.values().cloned().collect()
        };
        info!(count = adapters.len(), "AdapterRegistry::destroy: called");
        self.shutdown_signal.notify_all();

        for adapter in &adapters {
            adapter.deactivate();
        }
        for adapter in &adapters {
            adapter.wait_for_deactivate();
        }
        for adapter in &adapters {
            adapter.destroy();
        }
        self.lock().adapters.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn registry(properties: &[(&str, &str)]) -> Arc<AdapterRegistry> {
        let props = Properties::new();
        for (key, value) in properties {
            props.set_property(key, value).unwrap();
        }
        let props = Arc::new(props);
        let resolver = Arc::new(ReferenceResolver::new(Arc::clone(&props)).unwrap());
        AdapterRegistry::new(props, resolver)
    }

    #[test]
    fn test_create_and_find() {
        let registry = registry(&[("Printer.Endpoints", "tcp -p 1")]);
        let adapter = registry.create_adapter("Printer", None).unwrap();
        assert_eq!(adapter.name(), "Printer");
        assert!(registry.find("Printer").is_some());
        assert_eq!(registry.adapter_names(), vec!["Printer".to_string()]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = registry(&[("Printer.Endpoints", "tcp -p 1")]);
        registry.create_adapter("Printer", None).unwrap();
        let err = registry.create_adapter("Printer", None).unwrap_err();
        assert!(matches!(err, CommunicatorError::AlreadyRegistered { kind: "object adapter", .. }));
    }

    #[test]
    fn test_nameless_adapter_gets_uuid() {
        let registry = registry(&[]);
        let adapter = registry.create_adapter("", None).unwrap();
        assert!(Uuid::parse_str(adapter.name()).is_ok());
        assert!(adapter.endpoints().is_empty());
    }

    #[test]
    fn test_destroyed_adapter_leaves_registry() {
        let registry = registry(&[("Printer.Endpoints", "tcp -p 1")]);
        let adapter = registry.create_adapter("Printer", None).unwrap();
        adapter.destroy();
        assert!(registry.find("Printer").is_none());
        registry.create_adapter("Printer", None).unwrap();
    }

    #[test]
    fn test_shutdown_blocks_creation() {
        let registry = registry(&[("A.Endpoints", "tcp -p 1")]);
        registry.create_adapter("A", None).unwrap();
        assert!(!registry.is_shutdown());
        registry.shutdown();
        assert!(registry.is_shutdown());
        assert!(matches!(registry.create_adapter("", None), Err(CommunicatorError::ShutDown)));
    }

    #[test]
    fn test_wait_for_shutdown_releases_all_waiters() {
        let registry = registry(&[("A.Endpoints", "tcp -p 1")]);
        registry.create_adapter("A", None).unwrap().activate().unwrap();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.wait_for_shutdown();
                    registry.is_shutdown()
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        registry.shutdown();
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let registry = registry(&[("A.Endpoints", "tcp -p 1")]);
        let adapter = registry.create_adapter("A", None).unwrap();
        registry.destroy();
        registry.destroy();
        assert!(adapter.is_deactivated());
        assert!(registry.adapter_names().is_empty());
        assert!(registry.create_adapter("B", None).unwrap_err().is_destroyed());
    }
}
