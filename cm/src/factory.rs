//! Object factories keyed by type id

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::{CommunicatorError, Result};
use crate::servant::Servant;

/// Creates servants for a type id when unmarshalling by-value objects
pub trait ObjectFactory: Send + Sync {
    fn create(&self, type_id: &str) -> Option<Arc<dyn Servant>>;

    /// Called once when the communicator is destroyed
    fn destroy(&self) {}
}

/// Registry of object factories
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ObjectFactory>>>,
    // Written under the `factories` write lock
    destroyed: AtomicBool,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `id`; the empty id is the catch-all factory
    pub fn add(&self, factory: Arc<dyn ObjectFactory>, id: &str) -> Result<()> {
        debug!(%id, "FactoryRegistry::add: called");
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        if factories.contains_key(id) {
            return Err(CommunicatorError::AlreadyRegistered {
                kind: "object factory",
                id: id.to_string(),
            });
        }
        factories.insert(id.to_string(), factory);
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<Arc<dyn ObjectFactory>> {
        debug!(%id, "FactoryRegistry::find: called");
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Unregister without destroying; the caller owns the returned factory
    pub fn remove(&self, id: &str) -> Result<Arc<dyn ObjectFactory>> {
        debug!(%id, "FactoryRegistry::remove: called");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| CommunicatorError::NotRegistered {
                kind: "object factory",
                id: id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.factories.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every registered factory exactly once and clear the registry
    pub fn destroy(&self) {
        let drained: Vec<_> = {
            let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
            self.destroyed.store(true, Ordering::Release);
            factories.drain().collect()
        };
        debug!(count = drained.len(), "FactoryRegistry::destroy: called");
        for (_, factory) in drained {
            factory.destroy();
        }
    }
}
