//! Admin facets and the lazily created admin adapter
//!
//! The admin object has identity `<instance-name>/admin` in the `Comm.Admin`
//! adapter and one facet per registered admin servant. Built-in facets are
//! `Properties` and `Process`; `Comm.Admin.Facets` restricts which are
//! installed.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use propstore::Properties;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterRegistry, ObjectAdapter};
use crate::error::{CommunicatorError, Result};
use crate::identity::Identity;
use crate::proxy::Proxy;
use crate::servant::Servant;

/// Name of the admin object adapter
pub const ADMIN_ADAPTER: &str = "Comm.Admin";

pub const PROPERTIES_FACET: &str = "Properties";
pub const PROCESS_FACET: &str = "Process";

/// Remote access to the communicator's properties
pub struct PropertiesFacet {
    properties: Arc<Properties>,
}

impl PropertiesFacet {
    pub fn new(properties: Arc<Properties>) -> Self {
        Self { properties }
    }

    pub fn get_property(&self, key: &str) -> String {
        self.properties.get_property(key)
    }

    pub fn get_properties_for_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.properties.get_properties_for_prefix(prefix)
    }

    /// Apply updates; an empty value removes the key
    pub fn set_properties(&self, updates: &BTreeMap<String, String>) -> Result<()> {
        info!(count = updates.len(), "PropertiesFacet::set_properties: called");
        for (key, value) in updates {
            self.properties.set_property(key, value)?;
        }
        Ok(())
    }
}

impl Servant for PropertiesFacet {
    fn type_name(&self) -> &str {
        "::Comm::PropertiesAdmin"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Remote control of the process
pub struct ProcessFacet {
    adapters: Weak<AdapterRegistry>,
}

impl ProcessFacet {
    pub fn new(adapters: Weak<AdapterRegistry>) -> Self {
        Self { adapters }
    }

    /// Shut the communicator down, as `Communicator::shutdown` does
    pub fn shutdown(&self) {
        info!("ProcessFacet::shutdown: called");
        if let Some(adapters) = self.adapters.upgrade() {
            adapters.shutdown();
        }
    }
}

impl Servant for ProcessFacet {
    fn type_name(&self) -> &str {
        "::Comm::Process"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AdminObject {
    adapter: Arc<ObjectAdapter>,
    proxy: Proxy,
}

/// Admin facets plus the admin adapter once it exists
pub struct AdminRegistry {
    properties: Arc<Properties>,
    adapters: Arc<AdapterRegistry>,
    identity: Identity,
    facets: Mutex<BTreeMap<String, Arc<dyn Servant>>>,
    // Serializes creation of the admin adapter
    admin: Mutex<Option<AdminObject>>,
    destroyed: AtomicBool,
}

impl AdminRegistry {
    pub fn new(properties: Arc<Properties>, adapters: Arc<AdapterRegistry>) -> Self {
        let filter = properties.get_property("Comm.Admin.Facets");
        let enabled: Vec<&str> = filter.split([',', ' ', '\t']).filter(|f| !f.is_empty()).collect();
        let wanted = |name: &str| enabled.is_empty() || enabled.iter().any(|f| *f == name);

        let mut facets: BTreeMap<String, Arc<dyn Servant>> = BTreeMap::new();
        if wanted(PROPERTIES_FACET) {
            facets.insert(
                PROPERTIES_FACET.to_string(),
                Arc::new(PropertiesFacet::new(Arc::clone(&properties))),
            );
        }
        if wanted(PROCESS_FACET) {
            facets.insert(PROCESS_FACET.to_string(), Arc::new(ProcessFacet::new(Arc::downgrade(&adapters))));
        }

        let mut instance = properties.get_property("Comm.Admin.InstanceName");
        if instance.is_empty() {
            instance = Uuid::now_v7().to_string();
        }
        debug!(%instance, facets = ?facets.keys().collect::<Vec<_>>(), "AdminRegistry::new: called");

        Self {
            properties,
            adapters,
            identity: Identity::new("admin", instance),
            facets: Mutex::new(facets),
            admin: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    fn check_active(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        Ok(())
    }

    fn facets(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn Servant>>> {
        self.facets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admin(&self) -> MutexGuard<'_, Option<AdminObject>> {
        self.admin.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity of the admin object
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Register a facet, serving it at once when the admin adapter exists
    ///
    /// An admin adapter that refuses the facet fails the call and leaves the
    /// facet unregistered.
    pub fn add_facet(&self, servant: Arc<dyn Servant>, name: &str) -> Result<()> {
        debug!(%name, "AdminRegistry::add_facet: called");
        self.check_active()?;
        let admin = self.admin();
        if self.facets().contains_key(name) {
            return Err(CommunicatorError::AlreadyRegistered {
                kind: "admin facet",
                id: name.to_string(),
            });
        }
        if let Some(admin) = admin.as_ref() {
            admin.adapter.add_facet(Arc::clone(&servant), self.identity.clone(), name)?;
        }
        self.facets().insert(name.to_string(), servant);
        Ok(())
    }

    /// Remove a facet; `None` when no facet has that name
    pub fn remove_facet(&self, name: &str) -> Result<Option<Arc<dyn Servant>>> {
        debug!(%name, "AdminRegistry::remove_facet: called");
        self.check_active()?;
        let admin = self.admin();
        if !self.facets().contains_key(name) {
            return Ok(None);
        }
        if let Some(admin) = admin.as_ref() {
            admin.adapter.remove_facet(&self.identity, name)?;
        }
        Ok(self.facets().remove(name))
    }

    pub fn facet(&self, name: &str) -> Option<Arc<dyn Servant>> {
        self.facets().get(name).cloned()
    }

    pub fn facet_names(&self) -> Vec<String> {
        self.facets().keys().cloned().collect()
    }

    /// Proxy to the admin object, creating the admin adapter on first use
    ///
    /// `None` when `Comm.Admin.Endpoints` is not configured.
    pub fn admin_proxy(&self) -> Result<Option<Proxy>> {
        self.check_active()?;
        let mut admin = self.admin();
        if let Some(existing) = admin.as_ref() {
            return Ok(Some(existing.proxy.clone()));
        }
        if self.properties.get_property("Comm.Admin.Endpoints").trim().is_empty() {
            debug!("AdminRegistry::admin_proxy: admin endpoints not configured");
            return Ok(None);
        }

        let adapter = self.adapters.create_adapter(ADMIN_ADAPTER, None)?;
        let facets: Vec<_> = self.facets().iter().map(|(n, s)| (n.clone(), Arc::clone(s))).collect();
        let created = facets
            .into_iter()
            .try_for_each(|(name, servant)| adapter.add_facet(servant, self.identity.clone(), &name).map(|_| ()))
            .and_then(|_| adapter.activate())
            .and_then(|_| adapter.create_proxy(self.identity.clone()));

        match created {
            Ok(proxy) => {
                info!(%proxy, "AdminRegistry::admin_proxy: admin adapter created");
                *admin = Some(AdminObject {
                    adapter,
                    proxy: proxy.clone(),
                });
                Ok(Some(proxy))
            }
            Err(e) => {
                warn!(error = %e, "AdminRegistry::admin_proxy: creation failed");
                adapter.destroy();
                Err(e)
            }
        }
    }

    /// Drop the admin adapter and every facet
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("AdminRegistry::destroy: called");
        let admin = self.admin().take();
        if let Some(admin) = admin {
            admin.adapter.destroy();
        }
        self.facets().clear();
    }
}
