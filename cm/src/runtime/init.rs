//! Initialization data: the collaborators an application hands to a new communicator

use std::collections::HashMap;
use std::sync::Arc;

use propstore::Properties;

use crate::batch::RequestSink;
use crate::logger::Logger;
use crate::plugin::PluginFactory;
use crate::stats::Stats;

/// Everything a communicator is built from
///
/// Collaborators left unset get defaults: a `TracingLogger` prefixed with
/// `Comm.ProgramName`, `CountingStats` and a sink that discards batches.
#[derive(Clone, Default)]
pub struct InitializationData {
    pub properties: Arc<Properties>,
    pub logger: Option<Arc<dyn Logger>>,
    pub stats: Option<Arc<dyn Stats>>,
    pub plugin_factories: HashMap<String, Arc<dyn PluginFactory>>,
    pub request_sink: Option<Arc<dyn RequestSink>>,
}

impl InitializationData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Arc::new(properties);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Make a plugin factory available to `Comm.Plugin.<name> = <id>` entries
    pub fn with_plugin_factory(mut self, id: &str, factory: Arc<dyn PluginFactory>) -> Self {
        self.plugin_factories.insert(id.to_string(), factory);
        self
    }

    pub fn with_request_sink(mut self, sink: Arc<dyn RequestSink>) -> Self {
        self.request_sink = Some(sink);
        self
    }
}
