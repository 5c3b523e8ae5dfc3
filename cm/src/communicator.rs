//! Communicator - the root handle of the runtime
//!
//! The handle is cheap to clone and every clone shares one
//! [`RuntimeState`]. Once `destroy` has started, every operation except
//! `destroy`, `properties`, `logger` and `stats` fails with
//! [`CommunicatorError::AlreadyDestroyed`].

use std::sync::Arc;

use propstore::Properties;
use tracing::{debug, info, warn};

use crate::adapter::ObjectAdapter;
use crate::context::ImplicitContext;
use crate::error::{CommunicatorError, Result};
use crate::factory::ObjectFactory;
use crate::identity::{self, Identity};
use crate::logger::Logger;
use crate::plugin::PluginManager;
use crate::proxy::Proxy;
use crate::runtime::{InitializationData, RuntimeState};
use crate::servant::Servant;
use crate::stats::Stats;

/// Handle to a running communicator
#[derive(Clone)]
pub struct Communicator {
    state: Arc<RuntimeState>,
}

/// Parse `--Comm.*` options out of `args`, then construct and set up a communicator
///
/// Options the runtime and its plugins do not consume are left in `args`.
pub fn initialize(args: &mut Vec<String>, init_data: InitializationData) -> Result<Communicator> {
    debug!(arg_count = args.len(), "initialize: called");
    let properties = Properties::from_args(args, Some(&init_data.properties))?;
    let init_data = InitializationData {
        properties: Arc::new(properties),
        ..init_data
    };

    let communicator = Communicator::new(init_data)?;
    communicator.finish_setup(args)?;
    Ok(communicator)
}

impl Communicator {
    /// Construct the runtime state; nothing is half-built on error
    pub fn new(init_data: InitializationData) -> Result<Self> {
        debug!("Communicator::new: called");
        let state = RuntimeState::new(init_data)?;
        Ok(Self { state: Arc::new(state) })
    }

    /// Load plugins, install the default router and locator, create the admin adapter
    ///
    /// On failure the whole runtime is destroyed before the original error
    /// is returned.
    pub fn finish_setup(&self, args: &mut Vec<String>) -> Result<()> {
        debug!("Communicator::finish_setup: called");
        if let Err(e) = self.state.finish_setup(args) {
            warn!(error = %e, "Communicator::finish_setup: failed, destroying runtime");
            self.state.destroy();
            return Err(e);
        }
        Ok(())
    }

    /// Destroy the runtime; idempotent, and concurrent callers wait for the first
    pub fn destroy(&self) {
        debug!("Communicator::destroy: called");
        self.state.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.is_destroyed()
    }

    /// Deactivate every object adapter without waiting
    pub fn shutdown(&self) -> Result<()> {
        debug!("Communicator::shutdown: called");
        self.state.check_active()?;
        self.state.adapters.shutdown();
        Ok(())
    }

    /// Block until shutdown has been requested and every adapter is deactivated
    pub fn wait_for_shutdown(&self) -> Result<()> {
        debug!("Communicator::wait_for_shutdown: called");
        self.state.check_active()?;
        self.state.adapters.wait_for_shutdown();
        Ok(())
    }

    /// `wait_for_shutdown` for async callers, run on the blocking pool
    pub async fn wait_for_shutdown_async(&self) -> Result<()> {
        debug!("Communicator::wait_for_shutdown_async: called");
        self.state.check_active()?;
        let adapters = Arc::clone(&self.state.adapters);
        match tokio::task::spawn_blocking(move || adapters.wait_for_shutdown()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!(error = %e, "Communicator::wait_for_shutdown_async: wait cancelled");
                Err(CommunicatorError::ShutDown)
            }
        }
    }

    pub fn is_shutdown(&self) -> Result<bool> {
        self.state.check_active()?;
        Ok(self.state.adapters.is_shutdown())
    }

    /// Create an adapter configured from `<name>.*` properties
    ///
    /// An empty name creates an adapter with a generated name and no
    /// configuration.
    pub fn create_object_adapter(&self, name: &str) -> Result<Arc<ObjectAdapter>> {
        debug!(%name, "Communicator::create_object_adapter: called");
        self.state.check_active()?;
        self.state.adapters.create_adapter(name, None)
    }

    /// Set `<name>.Endpoints` to `endpoints`, then create the adapter
    pub fn create_object_adapter_with_endpoints(&self, name: &str, endpoints: &str) -> Result<Arc<ObjectAdapter>> {
        debug!(%name, %endpoints, "Communicator::create_object_adapter_with_endpoints: called");
        if name.is_empty() {
            return Err(CommunicatorError::Initialization(
                "cannot configure endpoints with nameless object adapter".to_string(),
            ));
        }
        self.state.check_active()?;

        self.state.properties.set_property(&format!("{}.Endpoints", name), endpoints)?;
        self.state.adapters.create_adapter(name, None)
    }

    /// Write the router's settings under `<name>.Router`, then create the adapter with it
    ///
    /// The three boolean flags are written inverted: a router flag of `true`
    /// is stored as `"0"`. Readers of these keys expect that convention.
    pub fn create_object_adapter_with_router(&self, name: &str, router: &Proxy) -> Result<Arc<ObjectAdapter>> {
        debug!(%name, %router, "Communicator::create_object_adapter_with_router: called");
        if name.is_empty() {
            return Err(CommunicatorError::Initialization(
                "cannot configure router with nameless object adapter".to_string(),
            ));
        }
        self.state.check_active()?;

        let properties = &self.state.properties;
        let resolver = &self.state.resolver;
        let inverted = |flag: bool| if flag { "0" } else { "1" };
        let key = |suffix: &str| format!("{}.Router{}", name, suffix);

        properties.set_property(&key(""), &resolver.proxy_to_string(Some(router)))?;
        if let Some(locator) = router.locator() {
            properties.set_property(&key(".Locator"), &resolver.proxy_to_string(Some(locator)))?;
        }
        properties.set_property(&key(".CollocationOptimized"), inverted(router.is_collocation_optimized()))?;
        properties.set_property(&key(".ConnectionCached"), inverted(router.is_connection_cached()))?;
        properties.set_property(&key(".PreferSecure"), inverted(router.is_prefer_secure()))?;
        properties.set_property(&key(".EndpointSelection"), &router.endpoint_selection().to_string())?;
        properties.set_property(&key(".LocatorCacheTimeout"), &router.locator_cache_timeout().to_string())?;

        self.state.adapters.create_adapter(name, Some(router.clone()))
    }

    pub fn find_object_adapter(&self, name: &str) -> Result<Option<Arc<ObjectAdapter>>> {
        self.state.check_active()?;
        Ok(self.state.adapters.find(name))
    }

    /// Parse a proxy; the empty string yields `None`
    pub fn string_to_proxy(&self, s: &str) -> Result<Option<Proxy>> {
        self.state.check_active()?;
        self.state.resolver.parse_proxy(s)
    }

    pub fn proxy_to_string(&self, proxy: Option<&Proxy>) -> Result<String> {
        self.state.check_active()?;
        Ok(self.state.resolver.proxy_to_string(proxy))
    }

    /// Proxy configured by the `<prefix>` property and its `<prefix>.*` settings
    pub fn property_to_proxy(&self, prefix: &str) -> Result<Option<Proxy>> {
        self.state.check_active()?;
        self.state.resolver.property_to_proxy(prefix)
    }

    pub fn string_to_identity(&self, s: &str) -> Result<Identity> {
        self.state.check_active()?;
        identity::string_to_identity(s)
    }

    pub fn identity_to_string(&self, identity: &Identity) -> Result<String> {
        self.state.check_active()?;
        Ok(identity::identity_to_string(identity))
    }

    pub fn add_object_factory(&self, factory: Arc<dyn ObjectFactory>, id: &str) -> Result<()> {
        self.state.check_active()?;
        self.state.factories.add(factory, id)
    }

    pub fn find_object_factory(&self, id: &str) -> Result<Option<Arc<dyn ObjectFactory>>> {
        self.state.check_active()?;
        Ok(self.state.factories.find(id))
    }

    pub fn properties(&self) -> Arc<Properties> {
        Arc::clone(&self.state.properties)
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        Arc::clone(&self.state.logger)
    }

    pub fn stats(&self) -> Arc<dyn Stats> {
        Arc::clone(&self.state.stats)
    }

    pub fn default_router(&self) -> Result<Option<Proxy>> {
        self.state.check_active()?;
        Ok(self.state.resolver.default_router())
    }

    /// Install, replace or clear (`None`) the default router
    pub fn set_default_router(&self, router: Option<Proxy>) -> Result<()> {
        self.state.check_active()?;
        self.state.resolver.set_default_router(router)
    }

    pub fn default_locator(&self) -> Result<Option<Proxy>> {
        self.state.check_active()?;
        Ok(self.state.resolver.default_locator())
    }

    /// Install, replace or clear (`None`) the default locator
    pub fn set_default_locator(&self, locator: Option<Proxy>) -> Result<()> {
        self.state.check_active()?;
        self.state.resolver.set_default_locator(locator)
    }

    /// `None` unless `Comm.ImplicitContext` is `Shared` or `PerThread`
    pub fn implicit_context(&self) -> Result<Option<Arc<ImplicitContext>>> {
        self.state.check_active()?;
        Ok(self.state.implicit_context.clone())
    }

    pub fn plugin_manager(&self) -> Result<Arc<PluginManager>> {
        self.state.check_active()?;
        Ok(Arc::clone(&self.state.plugins))
    }

    /// Queue a request made through a batch-mode proxy
    pub fn queue_batch_request(&self, proxy: &Proxy, operation: &str, payload: Vec<u8>) -> Result<()> {
        self.state.check_active()?;
        self.state.batch.queue(proxy, operation, payload)
    }

    /// Send every queued batch request; returns how many were delivered
    pub fn flush_batch_requests(&self) -> Result<usize> {
        self.state.check_active()?;
        let sent = self.state.batch.flush()?;
        info!(sent, "Communicator::flush_batch_requests: flushed");
        Ok(sent)
    }

    /// Proxy to the admin object, creating the admin adapter if needed
    pub fn admin(&self) -> Result<Option<Proxy>> {
        self.state.check_active()?;
        self.state.admin.admin_proxy()
    }

    pub fn add_admin_facet(&self, servant: Arc<dyn Servant>, facet: &str) -> Result<()> {
        self.state.check_active()?;
        self.state.admin.add_facet(servant, facet)
    }

    /// Remove an admin facet, returning it when it existed
    pub fn remove_admin_facet(&self, facet: &str) -> Result<Option<Arc<dyn Servant>>> {
        self.state.check_active()?;
        self.state.admin.remove_facet(facet)
    }

    pub fn find_admin_facet(&self, facet: &str) -> Result<Option<Arc<dyn Servant>>> {
        self.state.check_active()?;
        Ok(self.state.admin.facet(facet))
    }
}
