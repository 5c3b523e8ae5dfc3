//! ObjectAdapter - servant table plus activation state machine
//!
//! An adapter starts out holding. `activate` lets requests through,
//! `deactivate` refuses new requests and completes once every in-flight
//! [`Dispatch`] guard has been dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use propstore::Properties;
use tracing::{debug, info};
use uuid::Uuid;

use super::registry::AdapterRegistry;
use crate::endpoint::Endpoint;
use crate::error::{CommunicatorError, Result};
use crate::identity::Identity;
use crate::proxy::Proxy;
use crate::resolver::ReferenceResolver;
use crate::servant::Servant;

/// Activation state of an object adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Holding,
    Active,
    Deactivating,
    Deactivated,
    Destroyed,
}

impl AdapterState {
    fn is_deactivated(self) -> bool {
        matches!(self, AdapterState::Deactivated | AdapterState::Destroyed)
    }

    fn accepts_changes(self) -> bool {
        matches!(self, AdapterState::Holding | AdapterState::Active)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterState::Holding => "holding",
            AdapterState::Active => "active",
            AdapterState::Deactivating => "deactivating",
            AdapterState::Deactivated => "deactivated",
            AdapterState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

type ServantKey = (Identity, String);

struct AdapterInner {
    state: AdapterState,
    in_flight: usize,
    servants: HashMap<ServantKey, Arc<dyn Servant>>,
}

/// Named container of servants reachable through its endpoints
pub struct ObjectAdapter {
    name: String,
    endpoints: Vec<Endpoint>,
    published_endpoints: Vec<Endpoint>,
    adapter_id: String,
    router: Option<Proxy>,
    resolver: Arc<ReferenceResolver>,
    registry: Weak<AdapterRegistry>,
    inner: Mutex<AdapterInner>,
    state_changed: Condvar,
}

impl fmt::Debug for ObjectAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectAdapter")
            .field("name", &self.name)
            .field("adapter_id", &self.adapter_id)
            .finish_non_exhaustive()
    }
}

fn servant_id(identity: &Identity, facet: &str) -> String {
    if facet.is_empty() {
        identity.to_string()
    } else {
        format!("{} -f {}", identity, facet)
    }
}

impl ObjectAdapter {
    /// Build an adapter, reading `<name>.*` configuration when `configure` is set
    pub(crate) fn new(
        name: String,
        configure: bool,
        router: Option<Proxy>,
        properties: &Properties,
        resolver: Arc<ReferenceResolver>,
        registry: Weak<AdapterRegistry>,
    ) -> Result<Arc<Self>> {
        debug!(%name, %configure, has_router = router.is_some(), "ObjectAdapter::new: called");
        let mut endpoints = Vec::new();
        let mut published_endpoints = Vec::new();
        let mut adapter_id = String::new();
        let mut router = router;

        if configure {
            let configured = !properties.get_properties_for_prefix(&format!("{}.", name)).is_empty();
            if !configured && router.is_none() {
                return Err(CommunicatorError::Initialization(format!(
                    "object adapter `{}` requires configuration",
                    name
                )));
            }

            let text = properties.get_property(&format!("{}.Endpoints", name));
            if !text.trim().is_empty() {
                endpoints = resolver.parse_endpoints(&text, true)?;
            }

            let text = properties.get_property(&format!("{}.PublishedEndpoints", name));
            published_endpoints = if text.trim().is_empty() {
                endpoints
                    .iter()
                    .map(|e| if e.host() == Some("*") { e.clone().with_host("localhost") } else { e.clone() })
                    .collect()
            } else {
                resolver.parse_endpoints(&text, false)?
            };

            adapter_id = properties.get_property(&format!("{}.AdapterId", name));
            if router.is_none() {
                router = resolver.property_to_proxy(&format!("{}.Router", name))?;
            }
        }

        info!(%name, endpoints = endpoints.len(), %adapter_id, "ObjectAdapter::new: created");
        Ok(Arc::new(Self {
            name,
            endpoints,
            published_endpoints,
            adapter_id,
            router,
            resolver,
            registry,
            inner: Mutex::new(AdapterInner {
                state: AdapterState::Holding,
                in_flight: 0,
                servants: HashMap::new(),
            }),
            state_changed: Condvar::new(),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, AdapterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn published_endpoints(&self) -> &[Endpoint] {
        &self.published_endpoints
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    pub fn router(&self) -> Option<&Proxy> {
        self.router.as_ref()
    }

    pub fn state(&self) -> AdapterState {
        self.lock().state
    }

    /// Start dispatching requests
    pub fn activate(&self) -> Result<()> {
        debug!(name = %self.name, "ObjectAdapter::activate: called");
        let mut inner = self.lock();
        if !inner.state.accepts_changes() {
            return Err(self.deactivated_error());
        }
        inner.state = AdapterState::Active;
        Ok(())
    }

    /// Queue incoming requests instead of dispatching them
    pub fn hold(&self) -> Result<()> {
        debug!(name = %self.name, "ObjectAdapter::hold: called");
        let mut inner = self.lock();
        if !inner.state.accepts_changes() {
            return Err(self.deactivated_error());
        }
        inner.state = AdapterState::Holding;
        Ok(())
    }

    /// Refuse new requests; non-blocking and idempotent
    pub fn deactivate(&self) {
        let mut inner = self.lock();
        if !inner.state.accepts_changes() {
            return;
        }
        debug!(name = %self.name, in_flight = inner.in_flight, "ObjectAdapter::deactivate: called");
        inner.state = if inner.in_flight == 0 {
            AdapterState::Deactivated
        } else {
            AdapterState::Deactivating
        };
        drop(inner);
        self.state_changed.notify_all();
    }

    /// Block until deactivation has completed
    pub fn wait_for_deactivate(&self) {
        debug!(name = %self.name, "ObjectAdapter::wait_for_deactivate: called");
        let inner = self.lock();
        let _inner = self
            .state_changed
            .wait_while(inner, |inner| !inner.state.is_deactivated())
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn is_deactivated(&self) -> bool {
        self.lock().state.is_deactivated()
    }

    /// Deactivate, wait, drop every servant and leave the registry
    pub fn destroy(&self) {
        debug!(name = %self.name, "ObjectAdapter::destroy: called");
        self.deactivate();
        self.wait_for_deactivate();

        let servants = {
            let mut inner = self.lock();
            if inner.state == AdapterState::Destroyed {
                return;
            }
            inner.state = AdapterState::Destroyed;
            std::mem::take(&mut inner.servants)
        };
        self.state_changed.notify_all();
        drop(servants);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }
        info!(name = %self.name, "ObjectAdapter::destroy: destroyed");
    }

    /// Begin a request on the servant for `identity` and `facet`
    ///
    /// The adapter cannot finish deactivating while the returned guard lives.
    pub fn dispatch(self: &Arc<Self>, identity: &Identity, facet: &str) -> Result<Dispatch> {
        let mut inner = self.lock();
        match inner.state {
            AdapterState::Active => {}
            AdapterState::Holding => {
                return Err(CommunicatorError::AdapterHolding {
                    name: self.name.clone(),
                });
            }
            _ => return Err(self.deactivated_error()),
        }

        let servant = inner
            .servants
            .get(&(identity.clone(), facet.to_string()))
            .cloned()
            .ok_or_else(|| CommunicatorError::NotRegistered {
                kind: "servant",
                id: servant_id(identity, facet),
            })?;
        inner.in_flight += 1;

        Ok(Dispatch {
            adapter: Arc::clone(self),
            servant,
        })
    }

    fn finish_dispatch(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 && inner.state == AdapterState::Deactivating {
            inner.state = AdapterState::Deactivated;
            drop(inner);
            self.state_changed.notify_all();
        }
    }

    fn deactivated_error(&self) -> CommunicatorError {
        CommunicatorError::AdapterDeactivated {
            name: self.name.clone(),
        }
    }

    pub fn add(&self, servant: Arc<dyn Servant>, identity: Identity) -> Result<Proxy> {
        self.add_facet(servant, identity, "")
    }

    /// Register `servant` under `identity` and `facet` and return a proxy for it
    pub fn add_facet(&self, servant: Arc<dyn Servant>, identity: Identity, facet: &str) -> Result<Proxy> {
        debug!(name = %self.name, %identity, %facet, "ObjectAdapter::add_facet: called");
        if identity.name.is_empty() {
            return Err(CommunicatorError::IdentityParse {
                input: identity.to_string(),
                reason: "identity name is empty".to_string(),
            });
        }
        {
            let mut inner = self.lock();
            if !inner.state.accepts_changes() {
                return Err(self.deactivated_error());
            }
            let key = (identity.clone(), facet.to_string());
            if inner.servants.contains_key(&key) {
                return Err(CommunicatorError::AlreadyRegistered {
                    kind: "servant",
                    id: servant_id(&identity, facet),
                });
            }
            inner.servants.insert(key, servant);
        }
        Ok(self.create_proxy(identity)?.with_facet(facet))
    }

    /// Register under a fresh UUID identity
    pub fn add_with_uuid(&self, servant: Arc<dyn Servant>) -> Result<Proxy> {
        self.add(servant, Identity::named(Uuid::now_v7().to_string()))
    }

    pub fn remove(&self, identity: &Identity) -> Result<Arc<dyn Servant>> {
        self.remove_facet(identity, "")
    }

    pub fn remove_facet(&self, identity: &Identity, facet: &str) -> Result<Arc<dyn Servant>> {
        debug!(name = %self.name, %identity, %facet, "ObjectAdapter::remove_facet: called");
        let mut inner = self.lock();
        if inner.state == AdapterState::Destroyed {
            return Err(self.deactivated_error());
        }
        inner
            .servants
            .remove(&(identity.clone(), facet.to_string()))
            .ok_or_else(|| CommunicatorError::NotRegistered {
                kind: "servant",
                id: servant_id(identity, facet),
            })
    }

    pub fn find(&self, identity: &Identity) -> Option<Arc<dyn Servant>> {
        self.find_facet(identity, "")
    }

    pub fn find_facet(&self, identity: &Identity, facet: &str) -> Option<Arc<dyn Servant>> {
        self.lock().servants.get(&(identity.clone(), facet.to_string())).cloned()
    }

    /// Proxy for `identity`: indirect when the adapter has an id, else direct
    pub fn create_proxy(&self, identity: Identity) -> Result<Proxy> {
        if self.adapter_id.is_empty() {
            return self.create_direct_proxy(identity);
        }
        self.check_usable()?;
        let proxy = Proxy::new(identity).with_adapter_id(self.adapter_id.clone());
        self.resolver.with_defaults(proxy)
    }

    /// Proxy for `identity` carrying the published endpoints
    pub fn create_direct_proxy(&self, identity: Identity) -> Result<Proxy> {
        self.check_usable()?;
        let proxy = Proxy::new(identity).with_endpoints(self.published_endpoints.clone());
        self.resolver.with_defaults(proxy)
    }

    fn check_usable(&self) -> Result<()> {
        if self.lock().state.accepts_changes() {
            Ok(())
        } else {
            Err(self.deactivated_error())
        }
    }
}

/// In-flight request on an adapter
pub struct Dispatch {
    adapter: Arc<ObjectAdapter>,
    servant: Arc<dyn Servant>,
}

impl Dispatch {
    pub fn servant(&self) -> &Arc<dyn Servant> {
        &self.servant
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        self.adapter.finish_dispatch();
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::thread;
    use std::time::Duration;

    use super::*;

    struct Printer;

    impl Servant for Printer {
        fn type_name(&self) -> &str {
            "::Demo::Printer"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn adapter_with(properties: &[(&str, &str)], name: &str) -> Result<Arc<ObjectAdapter>> {
        let props = Properties::new();
        for (key, value) in properties {
            props.set_property(key, value).unwrap();
        }
        let props = Arc::new(props);
        let resolver = Arc::new(ReferenceResolver::new(Arc::clone(&props)).unwrap());
        ObjectAdapter::new(name.to_string(), true, None, &props, resolver, Weak::new())
    }

    fn printer_adapter() -> Arc<ObjectAdapter> {
        adapter_with(&[("Printer.Endpoints", "tcp -h * -p 10000")], "Printer").unwrap()
    }

    #[test]
    fn test_reads_configuration() {
        let adapter = adapter_with(
            &[
                ("Printer.Endpoints", "tcp -h * -p 10000:udp -p 10001"),
                ("Printer.AdapterId", "PrinterAdapter"),
            ],
            "Printer",
        )
        .unwrap();
        assert_eq!(adapter.endpoints().len(), 2);
        assert_eq!(adapter.published_endpoints()[0].host(), Some("localhost"));
        assert_eq!(adapter.adapter_id(), "PrinterAdapter");
        assert_eq!(adapter.state(), AdapterState::Holding);
    }

    #[test]
    fn test_requires_configuration() {
        let err = adapter_with(&[], "Printer").err().unwrap();
        assert!(err.is_initialization());
        assert!(err.to_string().contains("requires configuration"));
    }

    #[test]
    fn test_bad_endpoints_fail_construction() {
        let err = adapter_with(&[("A.Endpoints", "tcp -p 4)")], "A").err().unwrap();
        assert!(matches!(err, CommunicatorError::EndpointParse { .. }));
    }

    #[test]
    fn test_add_find_remove() {
        let adapter = printer_adapter();
        let id = Identity::named("printer");
        let proxy = adapter.add(Arc::new(Printer), id.clone()).unwrap();
        assert_eq!(proxy.to_string(), "printer -t:tcp -h localhost -p 10000");

        assert!(adapter.find(&id).is_some());
        let err = adapter.add(Arc::new(Printer), id.clone()).unwrap_err();
        assert!(matches!(err, CommunicatorError::AlreadyRegistered { kind: "servant", .. }));

        adapter.remove(&id).unwrap();
        assert!(adapter.find(&id).is_none());
        assert!(adapter.remove(&id).is_err());
    }

    #[test]
    fn test_facets_are_separate() {
        let adapter = printer_adapter();
        let id = Identity::named("printer");
        adapter.add(Arc::new(Printer), id.clone()).unwrap();
        let proxy = adapter.add_facet(Arc::new(Printer), id.clone(), "admin").unwrap();
        assert_eq!(proxy.facet(), "admin");
        assert!(adapter.find_facet(&id, "admin").is_some());
        adapter.remove(&id).unwrap();
        assert!(adapter.find_facet(&id, "admin").is_some());
    }

    #[test]
    fn test_add_with_uuid() {
        let adapter = printer_adapter();
        let proxy = adapter.add_with_uuid(Arc::new(Printer)).unwrap();
        assert!(Uuid::parse_str(&proxy.identity().name).is_ok());
    }

    #[test]
    fn test_indirect_proxy_with_adapter_id() {
        let adapter = adapter_with(&[("P.AdapterId", "PA")], "P").unwrap();
        let proxy = adapter.create_proxy(Identity::named("x")).unwrap();
        assert_eq!(proxy.to_string(), "x -t @ PA");
    }

    #[test]
    fn test_dispatch_respects_state() {
        let adapter = printer_adapter();
        let id = Identity::named("printer");
        adapter.add(Arc::new(Printer), id.clone()).unwrap();

        assert!(matches!(adapter.dispatch(&id, ""), Err(CommunicatorError::AdapterHolding { .. })));
        adapter.activate().unwrap();
        let guard = adapter.dispatch(&id, "").unwrap();
        assert_eq!(guard.servant().type_name(), "::Demo::Printer");
        drop(guard);

        assert!(matches!(
            adapter.dispatch(&Identity::named("other"), ""),
            Err(CommunicatorError::NotRegistered { .. })
        ));
    }

    #[test]
    fn test_deactivate_waits_for_in_flight_requests() {
        let adapter = printer_adapter();
        let id = Identity::named("printer");
        adapter.add(Arc::new(Printer), id.clone()).unwrap();
        adapter.activate().unwrap();

        let guard = adapter.dispatch(&id, "").unwrap();
        adapter.deactivate();
        assert_eq!(adapter.state(), AdapterState::Deactivating);
        assert!(!adapter.is_deactivated());
        assert!(matches!(adapter.dispatch(&id, ""), Err(CommunicatorError::AdapterDeactivated { .. })));

        let waiter = {
            let adapter = Arc::clone(&adapter);
            thread::spawn(move || adapter.wait_for_deactivate())
        };
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        waiter.join().unwrap();
        assert!(adapter.is_deactivated());
    }

    #[test]
    fn test_destroy_clears_servants() {
        let adapter = printer_adapter();
        let id = Identity::named("printer");
        adapter.add(Arc::new(Printer), id.clone()).unwrap();
        adapter.destroy();
        adapter.destroy();
        assert_eq!(adapter.state(), AdapterState::Destroyed);
        assert!(adapter.find(&id).is_none());
        assert!(adapter.activate().is_err());
        assert!(adapter.add(Arc::new(Printer), id).is_err());
    }
}
