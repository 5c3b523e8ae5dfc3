//! Endpoints and the factories that parse them
//!
//! An endpoint is a transport name followed by options, e.g.
//! `tcp -h localhost -p 4061 -t 5000`. Each transport has an
//! [`EndpointFactory`]; `tcp` and `udp` are built in and plugins may
//! register more through the resolver.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{CommunicatorError, Result};
use crate::tokens::{quote_if_needed, tokenize};

/// One `-x [value]` option of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointOption {
    pub name: String,
    pub value: Option<String>,
}

/// A parsed endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    transport: String,
    options: Vec<EndpointOption>,
}

impl Endpoint {
    pub fn new(transport: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            options: Vec::new(),
        }
    }

    /// Set an option, replacing an existing one with the same name in place
    pub fn with_option(mut self, name: &str, value: Option<&str>) -> Self {
        let value = value.map(str::to_string);
        match self.options.iter_mut().find(|o| o.name == name) {
            Some(existing) => existing.value = value,
            None => self.options.push(EndpointOption {
                name: name.to_string(),
                value,
            }),
        }
        self
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn options(&self) -> &[EndpointOption] {
        &self.options
    }

    /// Value of an option; flags without a value yield `None`
    pub fn option_value(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value.as_deref())
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o.name == name)
    }

    pub fn host(&self) -> Option<&str> {
        self.option_value("-h")
    }

    pub fn port(&self) -> Option<u16> {
        self.option_value("-p").and_then(|p| p.parse().ok())
    }

    pub fn with_host(self, host: &str) -> Self {
        self.with_option("-h", Some(host))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.transport)?;
        for option in &self.options {
            write!(f, " {}", option.name)?;
            if let Some(value) = &option.value {
                write!(f, " {}", quote_if_needed(value))?;
            }
        }
        Ok(())
    }
}

/// Creates endpoints for one transport
pub trait EndpointFactory: Send + Sync {
    /// Transport name this factory handles, e.g. `tcp`
    fn transport(&self) -> &str;

    /// Build an endpoint from the option tokens following the transport name
    ///
    /// `adapter_endpoint` is true when the endpoint describes where an object
    /// adapter listens rather than where a proxy connects.
    fn create(&self, options: &[String], adapter_endpoint: bool) -> Result<Endpoint>;

    /// Release factory resources
    fn destroy(&self) {}
}

/// Built-in factory for the IP transports
pub struct IpEndpointFactory {
    transport: &'static str,
    accepts_timeout: bool,
}

impl IpEndpointFactory {
    pub fn tcp() -> Self {
        Self {
            transport: "tcp",
            accepts_timeout: true,
        }
    }

    pub fn udp() -> Self {
        Self {
            transport: "udp",
            accepts_timeout: false,
        }
    }

    fn error(&self, options: &[String], reason: impl Into<String>) -> CommunicatorError {
        let mut input = self.transport.to_string();
        for option in options {
            input.push(' ');
            input.push_str(option);
        }
        CommunicatorError::EndpointParse {
            input,
            reason: reason.into(),
        }
    }
}

impl EndpointFactory for IpEndpointFactory {
    fn transport(&self) -> &str {
        self.transport
    }

    fn create(&self, options: &[String], adapter_endpoint: bool) -> Result<Endpoint> {
        debug!(transport = %self.transport, ?options, %adapter_endpoint, "IpEndpointFactory::create: called");
        let mut endpoint = Endpoint::new(self.transport);
        let mut iter = options.iter();

        while let Some(option) = iter.next() {
            match option.as_str() {
                "-z" => endpoint = endpoint.with_option("-z", None),
                "-h" | "-p" | "-t" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| self.error(options, format!("no argument provided for {} option", option)))?;
                    if value.contains('"') || value.contains('\\') {
                        return Err(self.error(options, format!("invalid character in {} argument", option)));
                    }
                    match option.as_str() {
                        "-h" if value == "*" && !adapter_endpoint => {
                            return Err(self.error(options, "`-h *` is only valid for object adapter endpoints"));
                        }
                        "-p" if value.parse::<u16>().is_err() => {
                            return Err(self.error(options, format!("invalid port value `{}`", value)));
                        }
                        "-t" if !self.accepts_timeout => {
                            return Err(self.error(options, format!("{} endpoints do not take a timeout", self.transport)));
                        }
                        "-t" if value != "infinite" && value.parse::<i32>().is_err() => {
                            return Err(self.error(options, format!("invalid timeout value `{}`", value)));
                        }
                        _ => {}
                    }
                    endpoint = endpoint.with_option(option, Some(value.as_str()));
                }
                other => return Err(self.error(options, format!("unknown option `{}`", other))),
            }
        }

        Ok(endpoint)
    }
}

/// Endpoint factories keyed by transport name
pub struct EndpointFactoryRegistry {
    factories: RwLock<Vec<Arc<dyn EndpointFactory>>>,
    // Written under the `factories` write lock
    destroyed: AtomicBool,
}

impl EndpointFactoryRegistry {
    /// Registry with no factories
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Registry with the built-in `tcp` and `udp` factories
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        {
            let mut factories = registry.factories.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            factories.push(Arc::new(IpEndpointFactory::tcp()));
            factories.push(Arc::new(IpEndpointFactory::udp()));
        }
        registry
    }

    pub fn add(&self, factory: Arc<dyn EndpointFactory>) -> Result<()> {
        let transport = factory.transport().to_string();
        debug!(%transport, "EndpointFactoryRegistry::add: called");
        let mut factories = self.factories.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        if factories.iter().any(|f| f.transport() == transport) {
            return Err(CommunicatorError::AlreadyRegistered {
                kind: "endpoint factory",
                id: transport,
            });
        }
        factories.push(factory);
        Ok(())
    }

    pub fn get(&self, transport: &str) -> Option<Arc<dyn EndpointFactory>> {
        self.factories
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|f| f.transport() == transport)
            .cloned()
    }

    /// Parse one endpoint string with the factory for its transport
    pub fn create(&self, s: &str, adapter_endpoint: bool) -> Result<Endpoint> {
        let parse_error = |reason: String| CommunicatorError::EndpointParse {
            input: s.to_string(),
            reason,
        };

        let mut tokens = tokenize(s).map_err(|reason| parse_error(reason.to_string()))?;
        if tokens.is_empty() {
            return Err(parse_error("endpoint is empty".to_string()));
        }
        let transport = tokens.remove(0);
        let factory = match self.get(&transport) {
            Some(factory) => factory,
            None if self.destroyed.load(Ordering::Acquire) => return Err(CommunicatorError::AlreadyDestroyed),
            None => return Err(parse_error(format!("unknown transport `{}`", transport))),
        };
        factory.create(&tokens, adapter_endpoint)
    }

    /// Destroy every factory once and empty the registry
    pub fn destroy(&self) {
        let drained: Vec<_> = {
            let mut factories = self.factories.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            self.destroyed.store(true, Ordering::Release);
            std::mem::take(&mut *factories)
        };
        debug!(count = drained.len(), "EndpointFactoryRegistry::destroy: called");
        for factory in drained {
            factory.destroy();
        }
    }
}
