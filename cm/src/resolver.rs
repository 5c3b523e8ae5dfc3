//! Reference resolver: proxy string forms and the default router/locator
//!
//! Parsed proxies pick up the `Comm.Default.*` policies read when the
//! resolver is constructed, plus whichever default router and locator are
//! installed at parse time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use propstore::Properties;
use tracing::debug;

use crate::endpoint::{Endpoint, EndpointFactory, EndpointFactoryRegistry};
use crate::error::{CommunicatorError, Result};
use crate::identity::{Identity, string_to_identity, unescape};
use crate::proxy::{EndpointSelection, InvocationMode, Proxy};
use crate::tokens::{split_unquoted, tokenize, unquoted_positions};

/// Policies applied to every proxy the resolver creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyDefaults {
    pub collocation_optimized: bool,
    pub prefer_secure: bool,
    pub endpoint_selection: EndpointSelection,
    pub locator_cache_timeout: i32,
}

impl Default for ProxyDefaults {
    fn default() -> Self {
        Self {
            collocation_optimized: true,
            prefer_secure: false,
            endpoint_selection: EndpointSelection::Random,
            locator_cache_timeout: -1,
        }
    }
}

impl ProxyDefaults {
    /// Read `Comm.Default.*`; an invalid endpoint selection is an error
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let selection = properties.get_property_with_default("Comm.Default.EndpointSelection", "Random");
        Ok(Self {
            collocation_optimized: properties.get_property_as_int_with_default("Comm.Default.CollocationOptimized", 1) > 0,
            prefer_secure: properties.get_property_as_int_with_default("Comm.Default.PreferSecure", 0) > 0,
            endpoint_selection: selection.parse()?,
            locator_cache_timeout: properties.get_property_as_int_with_default("Comm.Default.LocatorCacheTimeout", -1),
        })
    }
}

/// Converts between proxies and their string forms
pub struct ReferenceResolver {
    properties: Arc<Properties>,
    endpoint_factories: EndpointFactoryRegistry,
    defaults: ProxyDefaults,
    default_router: RwLock<Option<Proxy>>,
    default_locator: RwLock<Option<Proxy>>,
    destroyed: AtomicBool,
}

impl ReferenceResolver {
    pub fn new(properties: Arc<Properties>) -> Result<Self> {
        debug!("ReferenceResolver::new: called");
        let defaults = ProxyDefaults::from_properties(&properties)?;
        Ok(Self {
            properties,
            endpoint_factories: EndpointFactoryRegistry::with_builtins(),
            defaults,
            default_router: RwLock::new(None),
            default_locator: RwLock::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn defaults(&self) -> ProxyDefaults {
        self.defaults
    }

    fn check_active(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        Ok(())
    }

    /// Well-known proxy for `identity` with the default policies applied
    pub fn create_proxy(&self, identity: Identity) -> Result<Proxy> {
        self.check_active()?;
        Ok(self.apply_defaults(Proxy::new(identity)))
    }

    /// Apply the default policies, router and locator to a locally built proxy
    pub(crate) fn with_defaults(&self, proxy: Proxy) -> Result<Proxy> {
        self.check_active()?;
        Ok(self.apply_defaults(proxy))
    }

    fn apply_defaults(&self, proxy: Proxy) -> Proxy {
        let router = self.default_router.read().unwrap_or_else(PoisonError::into_inner).clone();
        let locator = if proxy.is_indirect() {
            self.default_locator.read().unwrap_or_else(PoisonError::into_inner).clone()
        } else {
            None
        };
        proxy
            .with_collocation_optimized(self.defaults.collocation_optimized)
            .with_prefer_secure(self.defaults.prefer_secure)
            .with_endpoint_selection(self.defaults.endpoint_selection)
            .with_locator_cache_timeout(self.defaults.locator_cache_timeout)
            .with_router(router)
            .with_locator(locator)
    }

    /// Parse a proxy string; the empty string is the null proxy
    pub fn parse_proxy(&self, s: &str) -> Result<Option<Proxy>> {
        debug!(%s, "ReferenceResolver::parse_proxy: called");
        self.check_active()?;

        let text = s.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let parse_error = |reason: String| CommunicatorError::ProxyParse {
            input: s.to_string(),
            reason,
        };

        let (head, target) = match unquoted_positions(text, &[':', '@']).first() {
            Some(&(index, delim)) => (&text[..index], Some((delim, &text[index + 1..]))),
            None => (text, None),
        };

        let tokens = tokenize(head).map_err(|reason| parse_error(reason.to_string()))?;
        let mut tokens = tokens.into_iter();
        let identity_text = tokens.next().ok_or_else(|| parse_error("missing identity".to_string()))?;
        let identity = string_to_identity(&identity_text).map_err(|e| parse_error(e.to_string()))?;
        let mut proxy = Proxy::new(identity);

        while let Some(token) = tokens.next() {
            if let Some(mode) = InvocationMode::from_flag(&token) {
                proxy = proxy.with_mode(mode);
                continue;
            }
            match token.as_str() {
                "-s" => proxy = proxy.with_secure(true),
                "-f" => {
                    let facet = tokens
                        .next()
                        .ok_or_else(|| parse_error("no argument provided for -f option".to_string()))?;
                    let facet = unescape(&facet).map_err(|reason| parse_error(reason.to_string()))?;
                    proxy = proxy.with_facet(facet);
                }
                other => return Err(parse_error(format!("unknown option `{}`", other))),
            }
        }

        match target {
            Some(('@', rest)) => {
                let tokens = tokenize(rest).map_err(|reason| parse_error(reason.to_string()))?;
                let [adapter_id] = tokens.as_slice() else {
                    return Err(parse_error("expected exactly one adapter id after `@`".to_string()));
                };
                let adapter_id = unescape(adapter_id).map_err(|reason| parse_error(reason.to_string()))?;
                if adapter_id.is_empty() {
                    return Err(parse_error("empty adapter id".to_string()));
                }
                proxy = proxy.with_adapter_id(adapter_id);
            }
            Some((_, rest)) => {
                let endpoints = self.parse_endpoints(rest, false)?;
                proxy = proxy.with_endpoints(endpoints);
            }
            None => {}
        }

        Ok(Some(self.apply_defaults(proxy)))
    }

    /// Parse a `:`-separated endpoint list
    pub fn parse_endpoints(&self, s: &str, adapter_endpoints: bool) -> Result<Vec<Endpoint>> {
        debug!(%s, %adapter_endpoints, "ReferenceResolver::parse_endpoints: called");
        self.check_active()?;
        let mut endpoints = Vec::new();
        for part in split_unquoted(s, ':') {
            if part.trim().is_empty() {
                return Err(CommunicatorError::EndpointParse {
                    input: s.to_string(),
                    reason: "empty endpoint".to_string(),
                });
            }
            endpoints.push(self.endpoint_factories.create(part, adapter_endpoints)?);
        }
        Ok(endpoints)
    }

    /// Canonical string form; the null proxy is the empty string
    pub fn proxy_to_string(&self, proxy: Option<&Proxy>) -> String {
        proxy.map(Proxy::to_string).unwrap_or_default()
    }

    /// Build a proxy from `<prefix>` and its `<prefix>.*` policy properties
    pub fn property_to_proxy(&self, prefix: &str) -> Result<Option<Proxy>> {
        debug!(%prefix, "ReferenceResolver::property_to_proxy: called");
        let text = self.properties.get_property(prefix);
        let Some(mut proxy) = self.parse_proxy(&text)? else {
            return Ok(None);
        };

        let locator = self.property_to_proxy(&format!("{}.Locator", prefix))?;
        if locator.is_some() {
            proxy = proxy.with_locator(locator);
        }
        let router = self.property_to_proxy(&format!("{}.Router", prefix))?;
        if router.is_some() {
            proxy = proxy.with_router(router);
        }

        let flag = |suffix: &str, current: bool| {
            self.properties
                .get_property_as_int_with_default(&format!("{}.{}", prefix, suffix), i32::from(current))
                > 0
        };
        let collocation_optimized = flag("CollocationOptimized", proxy.is_collocation_optimized());
        let connection_cached = flag("ConnectionCached", proxy.is_connection_cached());
        let prefer_secure = flag("PreferSecure", proxy.is_prefer_secure());
        proxy = proxy
            .with_collocation_optimized(collocation_optimized)
            .with_connection_cached(connection_cached)
            .with_prefer_secure(prefer_secure);

        let selection = self.properties.get_property(&format!("{}.EndpointSelection", prefix));
        if !selection.is_empty() {
            proxy = proxy.with_endpoint_selection(selection.parse()?);
        }
        let timeout = self.properties.get_property_as_int_with_default(
            &format!("{}.LocatorCacheTimeout", prefix),
            proxy.locator_cache_timeout(),
        );

        Ok(Some(proxy.with_locator_cache_timeout(timeout)))
    }

    pub fn default_router(&self) -> Option<Proxy> {
        self.default_router.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_default_router(&self, router: Option<Proxy>) -> Result<()> {
        debug!(router = ?router.as_ref().map(Proxy::to_string), "ReferenceResolver::set_default_router: called");
        let mut current = self.default_router.write().unwrap_or_else(PoisonError::into_inner);
        self.check_active()?;
        *current = router;
        Ok(())
    }

    pub fn default_locator(&self) -> Option<Proxy> {
        self.default_locator.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_default_locator(&self, locator: Option<Proxy>) -> Result<()> {
        debug!(locator = ?locator.as_ref().map(Proxy::to_string), "ReferenceResolver::set_default_locator: called");
        let mut current = self.default_locator.write().unwrap_or_else(PoisonError::into_inner);
        self.check_active()?;
        *current = locator;
        Ok(())
    }

    pub fn add_endpoint_factory(&self, factory: Arc<dyn EndpointFactory>) -> Result<()> {
        self.check_active()?;
        self.endpoint_factories.add(factory)
    }

    pub fn endpoint_factory(&self, transport: &str) -> Option<Arc<dyn EndpointFactory>> {
        self.endpoint_factories.get(transport)
    }

    /// Destroy endpoint factories and clear the default router and locator
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("ReferenceResolver::destroy: called");
        self.endpoint_factories.destroy();
        *self.default_router.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.default_locator.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ReferenceResolver {
        ReferenceResolver::new(Arc::new(Properties::new())).unwrap()
    }

    #[test]
    fn test_empty_string_is_null_proxy() {
        let resolver = resolver();
        assert!(resolver.parse_proxy("").unwrap().is_none());
        assert!(resolver.parse_proxy("   ").unwrap().is_none());
        assert_eq!(resolver.proxy_to_string(None), "");
    }

    #[test]
    fn test_parse_direct_proxy() {
        let proxy = resolver()
            .parse_proxy("office/printer -f admin -o:tcp -h localhost -p 4061:udp -p 4062")
            .unwrap()
            .unwrap();
        assert_eq!(proxy.identity(), &Identity::new("printer", "office"));
        assert_eq!(proxy.facet(), "admin");
        assert_eq!(proxy.mode(), InvocationMode::Oneway);
        assert_eq!(proxy.endpoints().len(), 2);
        assert_eq!(proxy.endpoints()[1].transport(), "udp");
    }

    #[test]
    fn test_parse_indirect_proxy() {
        let resolver = resolver();
        let proxy = resolver.parse_proxy("printer @ PrinterAdapter").unwrap().unwrap();
        assert_eq!(proxy.adapter_id(), "PrinterAdapter");
        assert_eq!(resolver.proxy_to_string(Some(&proxy)), "printer -t @ PrinterAdapter");
    }

    #[test]
    fn test_parse_errors() {
        let resolver = resolver();
        assert!(resolver.parse_proxy("printer -x").unwrap_err().is_parse());
        assert!(resolver.parse_proxy("printer @").unwrap_err().is_parse());
        assert!(resolver.parse_proxy("a/b/c").unwrap_err().is_parse());
        assert!(resolver.parse_proxy("printer:").unwrap_err().is_parse());
        assert!(resolver.parse_proxy("printer:bogus -p 1").unwrap_err().is_parse());
    }

    #[test]
    fn test_round_trip_quoted_parts() {
        let resolver = resolver();
        let text = "\"cat a/my printer\" -f \"a b\" -O -s @ \"adapter one\"";
        let proxy = resolver.parse_proxy(text).unwrap().unwrap();
        assert_eq!(proxy.identity().category, "cat a");
        let again = resolver.parse_proxy(&proxy.to_string()).unwrap().unwrap();
        assert_eq!(again, proxy);
    }

    #[test]
    fn test_defaults_from_properties() {
        let properties = Properties::new();
        properties.set_property("Comm.Default.EndpointSelection", "Ordered").unwrap();
        properties.set_property("Comm.Default.LocatorCacheTimeout", "30").unwrap();
        properties.set_property("Comm.Default.CollocationOptimized", "0").unwrap();
        let resolver = ReferenceResolver::new(Arc::new(properties)).unwrap();

        let proxy = resolver.parse_proxy("printer").unwrap().unwrap();
        assert_eq!(proxy.endpoint_selection(), EndpointSelection::Ordered);
        assert_eq!(proxy.locator_cache_timeout(), 30);
        assert!(!proxy.is_collocation_optimized());
    }

    #[test]
    fn test_invalid_default_selection() {
        let properties = Properties::new();
        properties.set_property("Comm.Default.EndpointSelection", "Sideways").unwrap();
        let err = ReferenceResolver::new(Arc::new(properties)).err().unwrap();
        assert!(err.is_initialization());
    }

    #[test]
    fn test_default_router_applied() {
        let resolver = resolver();
        let router = resolver.parse_proxy("router:tcp -p 1").unwrap();
        resolver.set_default_router(router.clone()).unwrap();
        let proxy = resolver.parse_proxy("printer").unwrap().unwrap();
        assert_eq!(proxy.router(), router.as_ref());

        resolver.set_default_router(None).unwrap();
        assert!(resolver.default_router().is_none());
    }

    #[test]
    fn test_default_locator_only_for_indirect() {
        let resolver = resolver();
        let locator = resolver.parse_proxy("locator:tcp -p 2").unwrap();
        resolver.set_default_locator(locator).unwrap();
        assert!(resolver.parse_proxy("p @ A").unwrap().unwrap().locator().is_some());
        assert!(resolver.parse_proxy("p:tcp -p 3").unwrap().unwrap().locator().is_none());
    }

    #[test]
    fn test_property_to_proxy() {
        let properties = Arc::new(Properties::new());
        properties.set_property("Printer.Proxy", "printer @ PrinterAdapter").unwrap();
        properties.set_property("Printer.Proxy.Locator", "locator:tcp -p 1").unwrap();
        properties.set_property("Printer.Proxy.PreferSecure", "1").unwrap();
        properties.set_property("Printer.Proxy.ConnectionCached", "0").unwrap();
        properties.set_property("Printer.Proxy.EndpointSelection", "Ordered").unwrap();
        properties.set_property("Printer.Proxy.LocatorCacheTimeout", "10").unwrap();
        let resolver = ReferenceResolver::new(Arc::clone(&properties)).unwrap();

        let proxy = resolver.property_to_proxy("Printer.Proxy").unwrap().unwrap();
        assert_eq!(proxy.locator().map(|l| l.identity().name.clone()), Some("locator".to_string()));
        assert!(proxy.is_prefer_secure());
        assert!(!proxy.is_connection_cached());
        assert_eq!(proxy.endpoint_selection(), EndpointSelection::Ordered);
        assert_eq!(proxy.locator_cache_timeout(), 10);

        assert!(resolver.property_to_proxy("Missing.Proxy").unwrap().is_none());
    }

    #[test]
    fn test_property_to_proxy_bad_selection() {
        let properties = Arc::new(Properties::new());
        properties.set_property("P", "p").unwrap();
        properties.set_property("P.EndpointSelection", "Nope").unwrap();
        let resolver = ReferenceResolver::new(properties).unwrap();
        assert!(resolver.property_to_proxy("P").unwrap_err().is_initialization());
    }

    #[test]
    fn test_destroyed_resolver_rejects_work() {
        let resolver = resolver();
        resolver.destroy();
        resolver.destroy();
        assert!(resolver.parse_proxy("printer").unwrap_err().is_destroyed());
        assert!(resolver.set_default_router(None).unwrap_err().is_destroyed());
        assert!(resolver.endpoint_factory("tcp").is_none());
    }
}
