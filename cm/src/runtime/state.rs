//! RuntimeState - owner of every collaborator and of one-shot teardown

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use propstore::Properties;
use tracing::{debug, info, warn};

use super::init::InitializationData;
use crate::adapter::AdapterRegistry;
use crate::admin::AdminRegistry;
use crate::batch::{BatchRequestQueue, DiscardingSink, RequestSink};
use crate::context::ImplicitContext;
use crate::error::{CommunicatorError, Result};
use crate::factory::FactoryRegistry;
use crate::logger::{Logger, TracingLogger};
use crate::plugin::{PluginContext, PluginFactory, PluginManager};
use crate::resolver::ReferenceResolver;
use crate::stats::{CountingStats, Stats};

pub(crate) struct RuntimeState {
    pub(crate) properties: Arc<Properties>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) stats: Arc<dyn Stats>,
    pub(crate) resolver: Arc<ReferenceResolver>,
    pub(crate) adapters: Arc<AdapterRegistry>,
    pub(crate) factories: FactoryRegistry,
    pub(crate) plugins: Arc<PluginManager>,
    pub(crate) admin: AdminRegistry,
    pub(crate) implicit_context: Option<Arc<ImplicitContext>>,
    pub(crate) batch: BatchRequestQueue,
    plugin_factories: HashMap<String, Arc<dyn PluginFactory>>,
    destroy_started: AtomicBool,
    teardown_done: Mutex<bool>,
    teardown_signal: Condvar,
}

impl RuntimeState {
    /// Build every collaborator; nothing here runs user code
    pub(crate) fn new(init: InitializationData) -> Result<Self> {
        let properties = init.properties;
        debug!(count = properties.len(), "RuntimeState::new: called");

        let logger: Arc<dyn Logger> = match init.logger {
            Some(logger) => logger,
            None => Arc::new(TracingLogger::new(properties.get_property("Comm.ProgramName"))),
        };
        let stats: Arc<dyn Stats> = match init.stats {
            Some(stats) => stats,
            None => Arc::new(CountingStats::new()),
        };
        let sink: Arc<dyn RequestSink> = match init.request_sink {
            Some(sink) => sink,
            None => Arc::new(DiscardingSink),
        };

        let implicit_context = ImplicitContext::from_property(&properties.get_property("Comm.ImplicitContext"))?.map(Arc::new);
        let resolver = Arc::new(ReferenceResolver::new(Arc::clone(&properties))?);
        let adapters = AdapterRegistry::new(Arc::clone(&properties), Arc::clone(&resolver));
        let admin = AdminRegistry::new(Arc::clone(&properties), Arc::clone(&adapters));

        Ok(Self {
            batch: BatchRequestQueue::new(sink, Arc::clone(&stats)),
            properties,
            logger,
            stats,
            resolver,
            adapters,
            factories: FactoryRegistry::new(),
            plugins: Arc::new(PluginManager::new()),
            admin,
            implicit_context,
            plugin_factories: init.plugin_factories,
            destroy_started: AtomicBool::new(false),
            teardown_done: Mutex::new(false),
            teardown_signal: Condvar::new(),
        })
    }

    /// Deferred setup: plugins, default router/locator, admin adapter
    pub(crate) fn finish_setup(&self, args: &mut Vec<String>) -> Result<()> {
        debug!(arg_count = args.len(), "RuntimeState::finish_setup: called");
        self.check_active()?;

        let context = PluginContext {
            properties: Arc::clone(&self.properties),
            resolver: Arc::clone(&self.resolver),
            logger: Arc::clone(&self.logger),
        };
        self.plugins.load_plugins(&context, &self.plugin_factories, args)?;
        if self.properties.get_property_as_int_with_default("Comm.InitPlugins", 1) > 0 {
            self.plugins.initialize_plugins()?;
        }

        if let Some(router) = self.resolver.property_to_proxy("Comm.Default.Router")? {
            self.resolver.set_default_router(Some(router))?;
        }
        if let Some(locator) = self.resolver.property_to_proxy("Comm.Default.Locator")? {
            self.resolver.set_default_locator(Some(locator))?;
        }

        if self.properties.get_property_as_int_with_default("Comm.Admin.DelayCreation", 0) <= 0 {
            self.admin.admin_proxy()?;
        }

        info!(plugins = ?self.plugins.plugin_names(), "RuntimeState::finish_setup: done");
        Ok(())
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroy_started.load(Ordering::Acquire)
    }

    pub(crate) fn check_active(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        Ok(())
    }

    /// Tear everything down exactly once
    ///
    /// Concurrent callers block until the first caller's teardown completes.
    pub(crate) fn destroy(&self) {
        if self
            .destroy_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("RuntimeState::destroy: waiting for teardown in progress");
            let done = self.teardown_done.lock().unwrap_or_else(PoisonError::into_inner);
            let _done = self
                .teardown_signal
                .wait_while(done, |done| !*done)
                .unwrap_or_else(PoisonError::into_inner);
            return;
        }

        info!("RuntimeState::destroy: tearing down");
        let _complete = TeardownComplete {
            done: &self.teardown_done,
            signal: &self.teardown_signal,
        };
        self.adapters.destroy();
        self.batch.destroy();
        self.admin.destroy();
        self.plugins.destroy();
        self.factories.destroy();
        self.resolver.destroy();

        if self.properties.get_property_as_int_with_default("Comm.Warn.UnusedProperties", 0) > 0 {
            let unused = self.properties.unused_properties();
            if !unused.is_empty() {
                self.logger
                    .warning(&format!("The following properties were set but never read:\n  {}", unused.join("\n  ")));
            }
        }
        info!("RuntimeState::destroy: done");
    }
}

/// Releases waiting destroyers when teardown ends, including by unwinding
struct TeardownComplete<'a> {
    done: &'a Mutex<bool>,
    signal: &'a Condvar,
}

impl Drop for TeardownComplete<'_> {
    fn drop(&mut self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            warn!("RuntimeState dropped without destroy, tearing down");
            self.destroy();
        }
    }
}
