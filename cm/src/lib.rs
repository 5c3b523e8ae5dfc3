//! Communicator - root runtime handle for a remote-object middleware
//!
//! A [`Communicator`] owns every runtime subsystem: the object adapters, the
//! proxy resolver with its default router and locator, object factories,
//! plugins, admin facets, the implicit context and the batch request queue.
//! Clones share one runtime, which is destroyed exactly once.
//!
//! # Example
//!
//! ```ignore
//! use communicator::{InitializationData, initialize};
//!
//! let mut args: Vec<String> = std::env::args().skip(1).collect();
//! let communicator = initialize(&mut args, InitializationData::new())?;
//!
//! let adapter = communicator.create_object_adapter_with_endpoints("Printer", "tcp -p 10000")?;
//! let proxy = adapter.add(servant, "printer".parse()?)?;
//! adapter.activate()?;
//!
//! communicator.wait_for_shutdown()?;
//! communicator.destroy();
//! ```

pub mod adapter;
pub mod admin;
pub mod batch;
pub mod cli;
mod communicator;
pub mod config;
pub mod context;
pub mod endpoint;
mod error;
pub mod factory;
pub mod identity;
pub mod logger;
pub mod plugin;
pub mod proxy;
pub mod resolver;
pub mod runtime;
pub mod servant;
pub mod stats;
mod tokens;

pub use adapter::{AdapterRegistry, AdapterState, Dispatch, ObjectAdapter};
pub use communicator::{Communicator, initialize};
pub use error::{CommunicatorError, Result};
pub use identity::{Identity, identity_to_string, string_to_identity};
pub use proxy::{EndpointSelection, InvocationMode, Proxy};
pub use runtime::InitializationData;
pub use servant::Servant;
