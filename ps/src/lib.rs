//! PropStore - thread-safe property store
//!
//! Holds the string key/value configuration shared by every subsystem of a
//! communicator runtime. Properties come from three places, later sources
//! overriding earlier ones:
//!
//! 1. Defaults handed in by the application
//! 2. Property files listed in `Comm.Config` (or the `COMM_CONFIG` env var)
//! 3. `--Prefix.Key=value` options on the command line
//!
//! # Property file format
//!
//! ```text
//! # comment
//! Printer.Endpoints = tcp -h localhost -p 10000
//! Weird.Key = value with \# hash and \= equals
//! ```
//!
//! # Example
//!
//! ```ignore
//! use propstore::Properties;
//!
//! let mut args = vec!["--Comm.Trace.Network=2".to_string(), "app-arg".to_string()];
//! let props = Properties::from_args(&mut args, None)?;
//! assert_eq!(props.get_property_as_int("Comm.Trace.Network"), 2);
//! assert_eq!(args, vec!["app-arg".to_string()]);
//! ```

pub mod cli;
mod error;
mod properties;

pub use error::{PropertiesError, Result};
pub use properties::{Properties, parse_line};

/// Prefix reserved for the runtime's own properties
pub const RUNTIME_PREFIX: &str = "Comm";

/// Property naming the configuration files to load
pub const CONFIG_PROPERTY: &str = "Comm.Config";

/// Environment variable consulted when `Comm.Config` is not given
pub const CONFIG_ENV_VAR: &str = "COMM_CONFIG";
