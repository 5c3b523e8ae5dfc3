//! Object adapters and the registry that owns them

mod object_adapter;
mod registry;

pub use object_adapter::{AdapterState, Dispatch, ObjectAdapter};
pub use registry::AdapterRegistry;
