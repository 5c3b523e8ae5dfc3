//! Proxies: typed references to remote objects
//!
//! A proxy names an object by identity and facet and says how to reach it:
//! directly through a list of endpoints, or indirectly through an adapter id
//! that a locator resolves. The invocation mode and connection policies
//! travel with the proxy. Proxies are immutable; the `with_*` builders
//! return modified copies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::CommunicatorError;
use crate::identity::{Identity, escape, identity_to_string};
use crate::tokens::quote_if_needed;

/// How requests sent through a proxy are delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InvocationMode {
    #[default]
    Twoway,
    Oneway,
    BatchOneway,
    Datagram,
    BatchDatagram,
}

impl InvocationMode {
    pub const ALL: [InvocationMode; 5] = [
        InvocationMode::Twoway,
        InvocationMode::Oneway,
        InvocationMode::BatchOneway,
        InvocationMode::Datagram,
        InvocationMode::BatchDatagram,
    ];

    /// Flag used in the proxy string form
    pub fn flag(self) -> &'static str {
        match self {
            InvocationMode::Twoway => "-t",
            InvocationMode::Oneway => "-o",
            InvocationMode::BatchOneway => "-O",
            InvocationMode::Datagram => "-d",
            InvocationMode::BatchDatagram => "-D",
        }
    }

    pub fn from_flag(flag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.flag() == flag)
    }

    /// Requests are queued and sent on flush
    pub fn is_batch(self) -> bool {
        matches!(self, InvocationMode::BatchOneway | InvocationMode::BatchDatagram)
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationMode::Twoway => "twoway",
            InvocationMode::Oneway => "oneway",
            InvocationMode::BatchOneway => "batch-oneway",
            InvocationMode::Datagram => "datagram",
            InvocationMode::BatchDatagram => "batch-datagram",
        };
        f.write_str(name)
    }
}

/// Order in which a proxy tries its endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EndpointSelection {
    #[default]
    Random,
    Ordered,
}

impl fmt::Display for EndpointSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSelection::Random => f.write_str("Random"),
            EndpointSelection::Ordered => f.write_str("Ordered"),
        }
    }
}

impl FromStr for EndpointSelection {
    type Err = CommunicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Random" => Ok(EndpointSelection::Random),
            "Ordered" => Ok(EndpointSelection::Ordered),
            other => Err(CommunicatorError::Initialization(format!(
                "invalid endpoint selection `{}`, expected Random or Ordered",
                other
            ))),
        }
    }
}

/// Reference to a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    identity: Identity,
    facet: String,
    mode: InvocationMode,
    secure: bool,
    endpoints: Vec<Endpoint>,
    adapter_id: String,
    router: Option<Arc<Proxy>>,
    locator: Option<Arc<Proxy>>,
    collocation_optimized: bool,
    connection_cached: bool,
    prefer_secure: bool,
    endpoint_selection: EndpointSelection,
    locator_cache_timeout: i32,
}

impl Proxy {
    /// Well-known proxy: no endpoints, no adapter id, default policies
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            facet: String::new(),
            mode: InvocationMode::Twoway,
            secure: false,
            endpoints: Vec::new(),
            adapter_id: String::new(),
            router: None,
            locator: None,
            collocation_optimized: true,
            connection_cached: true,
            prefer_secure: false,
            endpoint_selection: EndpointSelection::Random,
            locator_cache_timeout: -1,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn facet(&self) -> &str {
        &self.facet
    }

    pub fn mode(&self) -> InvocationMode {
        self.mode
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    /// No endpoints; the locator resolves the target
    pub fn is_indirect(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn router(&self) -> Option<&Proxy> {
        self.router.as_deref()
    }

    pub fn locator(&self) -> Option<&Proxy> {
        self.locator.as_deref()
    }

    pub fn is_collocation_optimized(&self) -> bool {
        self.collocation_optimized
    }

    pub fn is_connection_cached(&self) -> bool {
        self.connection_cached
    }

    pub fn is_prefer_secure(&self) -> bool {
        self.prefer_secure
    }

    pub fn endpoint_selection(&self) -> EndpointSelection {
        self.endpoint_selection
    }

    /// Seconds a locator lookup stays cached; -1 caches forever
    pub fn locator_cache_timeout(&self) -> i32 {
        self.locator_cache_timeout
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facet = facet.into();
        self
    }

    pub fn with_mode(mut self, mode: InvocationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Replace the endpoints; a direct proxy carries no adapter id
    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        if !endpoints.is_empty() {
            self.adapter_id.clear();
        }
        self.endpoints = endpoints;
        self
    }

    /// Make the proxy indirect through an adapter id
    pub fn with_adapter_id(mut self, adapter_id: impl Into<String>) -> Self {
        self.adapter_id = adapter_id.into();
        if !self.adapter_id.is_empty() {
            self.endpoints.clear();
        }
        self
    }

    pub fn with_router(mut self, router: Option<Proxy>) -> Self {
        self.router = router.map(Arc::new);
        self
    }

    pub fn with_locator(mut self, locator: Option<Proxy>) -> Self {
        self.locator = locator.map(Arc::new);
        self
    }

    pub fn with_collocation_optimized(mut self, value: bool) -> Self {
        self.collocation_optimized = value;
        self
    }

    pub fn with_connection_cached(mut self, value: bool) -> Self {
        self.connection_cached = value;
        self
    }

    pub fn with_prefer_secure(mut self, value: bool) -> Self {
        self.prefer_secure = value;
        self
    }

    pub fn with_endpoint_selection(mut self, selection: EndpointSelection) -> Self {
        self.endpoint_selection = selection;
        self
    }

    pub fn with_locator_cache_timeout(mut self, timeout: i32) -> Self {
        self.locator_cache_timeout = timeout;
        self
    }
}

impl fmt::Display for Proxy {
    /// Canonical string form, e.g. `office/printer -t:tcp -h host -p 4061`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_if_needed(&identity_to_string(&self.identity)))?;
        if !self.facet.is_empty() {
            write!(f, " -f {}", quote_if_needed(&escape(&self.facet, &['"'])))?;
        }
        write!(f, " {}", self.mode.flag())?;
        if self.secure {
            f.write_str(" -s")?;
        }
        if !self.endpoints.is_empty() {
            for endpoint in &self.endpoints {
                write!(f, ":{}", endpoint)?;
            }
        } else if !self.adapter_id.is_empty() {
            write!(f, " @ {}", quote_if_needed(&escape(&self.adapter_id, &['"'])))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(port: &str) -> Endpoint {
        Endpoint::new("tcp").with_host("localhost").with_option("-p", Some(port))
    }

    #[test]
    fn test_well_known_display() {
        let proxy = Proxy::new(Identity::named("printer"));
        assert_eq!(proxy.to_string(), "printer -t");
        assert!(proxy.is_indirect());
    }

    #[test]
    fn test_direct_display() {
        let proxy = Proxy::new(Identity::new("printer", "office"))
            .with_facet("admin")
            .with_mode(InvocationMode::Oneway)
            .with_secure(true)
            .with_endpoints(vec![tcp("1"), tcp("2")]);
        assert_eq!(
            proxy.to_string(),
            "office/printer -f admin -o -s:tcp -h localhost -p 1:tcp -h localhost -p 2"
        );
    }

    #[test]
    fn test_indirect_display_quotes_adapter_id() {
        let proxy = Proxy::new(Identity::named("my printer")).with_adapter_id("Printer Adapter");
        assert_eq!(proxy.to_string(), "\"my printer\" -t @ \"Printer Adapter\"");
    }

    #[test]
    fn test_endpoints_clear_adapter_id() {
        let proxy = Proxy::new(Identity::named("p"))
            .with_adapter_id("A")
            .with_endpoints(vec![tcp("1")]);
        assert_eq!(proxy.adapter_id(), "");
        assert!(!proxy.is_indirect());
    }

    #[test]
    fn test_default_policies() {
        let proxy = Proxy::new(Identity::named("p"));
        assert!(proxy.is_collocation_optimized());
        assert!(proxy.is_connection_cached());
        assert!(!proxy.is_prefer_secure());
        assert_eq!(proxy.endpoint_selection(), EndpointSelection::Random);
        assert_eq!(proxy.locator_cache_timeout(), -1);
        assert!(proxy.router().is_none());
        assert!(proxy.locator().is_none());
    }

    #[test]
    fn test_mode_flags() {
        for mode in InvocationMode::ALL {
            assert_eq!(InvocationMode::from_flag(mode.flag()), Some(mode));
        }
        assert!(InvocationMode::BatchOneway.is_batch());
        assert!(!InvocationMode::Datagram.is_batch());
        assert_eq!(InvocationMode::Twoway.to_string(), "twoway");
    }

    #[test]
    fn test_endpoint_selection_parse() {
        assert_eq!("Ordered".parse::<EndpointSelection>().unwrap(), EndpointSelection::Ordered);
        assert!("ordered".parse::<EndpointSelection>().is_err());
        assert_eq!(EndpointSelection::Random.to_string(), "Random");
    }
}
