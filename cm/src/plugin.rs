//! Plugins configured through `Comm.Plugin.*`
//!
//! `Comm.Plugin.<name> = <factory-id> [args...]` names a [`PluginFactory`]
//! registered in the initialization data. Plugins are loaded in
//! `Comm.PluginLoadOrder` order, then the remaining names sorted, and
//! destroyed in reverse.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use propstore::Properties;
use tracing::{debug, info, warn};

use crate::error::{CommunicatorError, Result};
use crate::logger::Logger;
use crate::resolver::ReferenceResolver;

const PLUGIN_PREFIX: &str = "Comm.Plugin.";

/// A runtime extension
pub trait Plugin: Send + Sync {
    /// Second phase of setup, run after every plugin has been created
    fn initialize(&self) -> Result<()>;

    fn destroy(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Creates a plugin from its configuration
pub trait PluginFactory: Send + Sync {
    fn create(&self, context: &PluginContext, name: &str, args: &[String]) -> Result<Arc<dyn Plugin>>;
}

/// Runtime services available to plugin factories
#[derive(Clone)]
pub struct PluginContext {
    pub properties: Arc<Properties>,
    pub resolver: Arc<ReferenceResolver>,
    pub logger: Arc<dyn Logger>,
}

struct PluginEntry {
    name: String,
    plugin: Arc<dyn Plugin>,
    initialized: bool,
}

#[derive(Default)]
struct ManagerInner {
    plugins: Vec<PluginEntry>,
    initialized: bool,
    destroyed: bool,
}

/// Owns the plugins of a communicator
#[derive(Default)]
pub struct PluginManager {
    inner: Mutex<ManagerInner>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create every configured plugin
    ///
    /// `--<name>.*` options for each plugin are moved from `args` into the
    /// properties before its factory runs.
    pub fn load_plugins(
        &self,
        context: &PluginContext,
        factories: &HashMap<String, Arc<dyn PluginFactory>>,
        args: &mut Vec<String>,
    ) -> Result<()> {
        let configured: BTreeMap<String, String> = context
            .properties
            .get_properties_for_prefix(PLUGIN_PREFIX)
            .into_iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(PLUGIN_PREFIX)?;
                (!name.is_empty() && !name.contains('.')).then(|| (name.to_string(), value))
            })
            .collect();
        debug!(count = configured.len(), "PluginManager::load_plugins: called");

        let mut order = Vec::new();
        let load_order = context.properties.get_property("Comm.PluginLoadOrder");
        for name in load_order.split([',', ' ', '\t']).filter(|n| !n.is_empty()) {
            if !configured.contains_key(name) {
                return Err(CommunicatorError::Plugin {
                    name: name.to_string(),
                    reason: "listed in Comm.PluginLoadOrder but not configured".to_string(),
                });
            }
            if !order.iter().any(|n| n == name) {
                order.push(name.to_string());
            }
        }
        for name in configured.keys() {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }

        for name in order {
            let value = &configured[&name];
            let mut words = value.split_whitespace();
            let Some(factory_id) = words.next() else {
                return Err(CommunicatorError::Plugin {
                    name,
                    reason: "no plugin factory specified".to_string(),
                });
            };
            let plugin_args: Vec<String> = words.map(str::to_string).collect();

            *args = context.properties.parse_command_line_options(&name, args)?;

            let factory = factories.get(factory_id).ok_or_else(|| CommunicatorError::Plugin {
                name: name.clone(),
                reason: format!("plugin factory `{}` is not registered", factory_id),
            })?;
            let plugin = factory.create(context, &name, &plugin_args)?;
            self.push(name, plugin, false)?;
        }
        Ok(())
    }

    fn push(&self, name: String, plugin: Arc<dyn Plugin>, initialized: bool) -> Result<()> {
        let mut inner = self.lock();
        if inner.destroyed {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        if inner.plugins.iter().any(|e| e.name == name) {
            return Err(CommunicatorError::AlreadyRegistered { kind: "plugin", id: name });
        }
        info!(%name, "PluginManager: plugin added");
        inner.plugins.push(PluginEntry {
            name,
            plugin,
            initialized,
        });
        Ok(())
    }

    /// Initialize loaded plugins in load order
    ///
    /// If one fails, the plugins initialized before it are destroyed in
    /// reverse order and the error is returned.
    pub fn initialize_plugins(&self) -> Result<()> {
        let pending: Vec<(String, Arc<dyn Plugin>)> = {
            let mut inner = self.lock();
            if inner.destroyed {
                return Err(CommunicatorError::AlreadyDestroyed);
            }
            if inner.initialized {
                return Err(CommunicatorError::Initialization("plugins already initialized".to_string()));
            }
            inner.initialized = true;
            inner
                .plugins
                .iter()
                .filter(|e| !e.initialized)
                .map(|e| (e.name.clone(), Arc::clone(&e.plugin)))
                .collect()
        };
        debug!(count = pending.len(), "PluginManager::initialize_plugins: called");

        let mut done: Vec<(String, Arc<dyn Plugin>)> = Vec::new();
        for (name, plugin) in pending {
            if let Err(e) = plugin.initialize() {
                warn!(%name, error = %e, "PluginManager::initialize_plugins: rolling back");
                for (done_name, done_plugin) in done.iter().rev() {
                    done_plugin.destroy();
                    self.set_initialized(done_name, false);
                }
                return Err(e);
            }
            self.set_initialized(&name, true);
            done.push((name, plugin));
        }
        Ok(())
    }

    fn set_initialized(&self, name: &str, initialized: bool) {
        if let Some(entry) = self.lock().plugins.iter_mut().find(|e| e.name == name) {
            entry.initialized = initialized;
        }
    }

    /// Install an already initialized plugin
    pub fn add_plugin(&self, name: &str, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.push(name.to_string(), plugin, true)
    }

    pub fn get_plugin(&self, name: &str) -> Result<Arc<dyn Plugin>> {
        self.lock()
            .plugins
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.plugin))
            .ok_or_else(|| CommunicatorError::NotRegistered {
                kind: "plugin",
                id: name.to_string(),
            })
    }

    /// Plugin names in load order
    pub fn plugin_names(&self) -> Vec<String> {
        self.lock().plugins.iter().map(|e| e.name.clone()).collect()
    }

    /// Destroy initialized plugins in reverse load order
    pub fn destroy(&self) {
        let plugins = {
            let mut inner = self.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            std::mem::take(&mut inner.plugins)
        };
        debug!(count = plugins.len(), "PluginManager::destroy: called");
        for entry in plugins.into_iter().rev() {
            if entry.initialized {
                debug!(name = %entry.name, "PluginManager::destroy: destroying plugin");
                entry.plugin.destroy();
            }
        }
    }
}
