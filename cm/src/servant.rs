//! Servants: the local objects that incarnate identities in an adapter

use std::any::Any;

/// A local object reachable through an object adapter
pub trait Servant: Send + Sync {
    /// Type id of the most-derived interface, e.g. `::Demo::Printer`
    fn type_name(&self) -> &str;

    /// Downcast support for callers that know the concrete type
    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn Servant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Servant").field("type_name", &self.type_name()).finish()
    }
}
