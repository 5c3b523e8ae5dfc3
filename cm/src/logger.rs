//! Runtime logger collaborator
//!
//! Applications can supply their own [`Logger`] through the initialization
//! data; the default forwards everything to `tracing`.

use std::sync::Arc;

use tracing::{error, info, trace, warn};

/// Sink for messages the runtime reports to the application
pub trait Logger: Send + Sync {
    fn print(&self, message: &str);

    fn trace(&self, category: &str, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    fn prefix(&self) -> &str;

    /// Copy of this logger using a different prefix
    fn with_prefix(&self, prefix: &str) -> Arc<dyn Logger>;
}

/// Logger that emits `tracing` events under the `communicator` target
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    prefix: String,
}

impl TracingLogger {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Logger for TracingLogger {
    fn print(&self, message: &str) {
        info!(target: "communicator", prefix = %self.prefix, "{}", message);
    }

    fn trace(&self, category: &str, message: &str) {
        trace!(target: "communicator", prefix = %self.prefix, %category, "{}", message);
    }

    fn warning(&self, message: &str) {
        warn!(target: "communicator", prefix = %self.prefix, "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "communicator", prefix = %self.prefix, "{}", message);
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn with_prefix(&self, prefix: &str) -> Arc<dyn Logger> {
        Arc::new(TracingLogger::new(prefix))
    }
}
