//! Registered stubs and the glue the host transport calls into.
//!
//! The host activates each stub once with its live endpoint, then hands every
//! incoming request to [`StubRegistry::dispatch`], which routes it by
//! endpoint to the stub that answers it.

use crate::config::StubbleConfig;
use crate::endpoint::Endpoint;
use crate::error::{ConfigurationError, DispatchError};
use crate::exchange::Exchange;
use crate::selector::Selection;
use crate::stub::StubDefinition;
use crate::uri;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One stub bound to its endpoint.
pub struct StubRoute {
    stub: Arc<StubDefinition>,
    route_id: String,
    active: AtomicBool,
    /// Requests answered
    requests_served: AtomicU64,
    /// Requests whose actions failed
    requests_failed: AtomicU64,
    log_requests: bool,
}

impl StubRoute {
    fn new(stub: StubDefinition, log_requests: bool) -> Self {
        Self {
            route_id: stub.route_id(),
            stub: Arc::new(stub),
            active: AtomicBool::new(false),
            requests_served: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            log_requests,
        }
    }

    pub fn stub(&self) -> &Arc<StubDefinition> {
        &self.stub
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    fn activate(&self, endpoint: &mut dyn Endpoint) {
        if self.active.swap(true, Ordering::AcqRel) {
            debug!(route_id = %self.route_id, "Stub already active");
            return;
        }
        info!(
            stub = %self.stub.description(),
            endpoint = %self.stub.endpoint_uri(),
            route_id = %self.route_id,
            "Starting stub"
        );
        self.stub.activate(endpoint);
    }

    fn process(&self, exchange: &mut Exchange) -> Result<Selection, DispatchError> {
        if !self.is_active() {
            return Err(DispatchError::Inactive(self.stub.description().to_string()));
        }

        if self.log_requests {
            debug!(
                endpoint = %self.stub.endpoint_uri(),
                body = %String::from_utf8_lossy(exchange.body()),
                headers = ?exchange.headers().to_map(),
                "Endpoint received request"
            );
        }

        match self.stub.handle(exchange) {
            Ok(selection) => {
                self.requests_served.fetch_add(1, Ordering::Relaxed);
                if self.log_requests {
                    debug!(
                        endpoint = %self.stub.endpoint_uri(),
                        ?selection,
                        body = %String::from_utf8_lossy(exchange.body()),
                        headers = ?exchange.headers().to_map(),
                        "Endpoint returning response"
                    );
                }
                Ok(selection)
            }
            Err(e) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(route_id = %self.route_id, error = %e, "Stub action failed");
                Err(e.into())
            }
        }
    }
}

/// All stubs of a run, keyed by normalized endpoint.
pub struct StubRegistry {
    routes: Vec<StubRoute>,
    by_endpoint: HashMap<String, usize>,
    log_requests: bool,
}

impl Default for StubRegistry {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            by_endpoint: HashMap::new(),
            log_requests: true,
        }
    }
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every stub in the configuration and register it.
    pub fn from_config(config: &StubbleConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.log_requests = config.settings.log_requests;
        for stub in config.build_stubs()? {
            registry.register(stub)?;
        }
        info!(stubs = registry.len(), "Stub registry initialized");
        Ok(registry)
    }

    /// Register a built stub. Descriptions and endpoints must be unique.
    pub fn register(&mut self, stub: StubDefinition) -> Result<&StubRoute, ConfigurationError> {
        if self
            .routes
            .iter()
            .any(|r| r.stub.description() == stub.description())
        {
            return Err(ConfigurationError::DuplicateDescription(
                stub.description().to_string(),
            ));
        }
        if let Some(&idx) = self.by_endpoint.get(stub.endpoint_uri()) {
            return Err(ConfigurationError::DuplicateEndpoint {
                endpoint: stub.endpoint_uri().to_string(),
                existing: self.routes[idx].stub.description().to_string(),
            });
        }

        let idx = self.routes.len();
        self.by_endpoint.insert(stub.endpoint_uri().to_string(), idx);
        self.routes.push(StubRoute::new(stub, self.log_requests));
        Ok(&self.routes[idx])
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> impl Iterator<Item = &StubRoute> {
        self.routes.iter()
    }

    /// Find the route for an endpoint, in any spelling.
    pub fn route(&self, endpoint: &str) -> Option<&StubRoute> {
        let normalized = uri::normalize(endpoint).ok()?;
        self.by_endpoint.get(&normalized).map(|&idx| &self.routes[idx])
    }

    /// Apply the matching stub's customizations to `endpoint` and start
    /// serving it. Activating twice is a no-op.
    pub fn activate(&self, endpoint: &mut dyn Endpoint) -> Result<(), DispatchError> {
        let route = self
            .route(endpoint.uri())
            .ok_or_else(|| DispatchError::UnknownEndpoint(endpoint.uri().to_string()))?;
        route.activate(endpoint);
        Ok(())
    }

    /// Answer one request, mutating the exchange into the response.
    pub fn dispatch(&self, exchange: &mut Exchange) -> Result<Selection, DispatchError> {
        let route = self
            .route(exchange.endpoint())
            .ok_or_else(|| DispatchError::UnknownEndpoint(exchange.endpoint().to_string()))?;
        route.process(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{from_fn, text};
    use crate::endpoint::EndpointHandle;
    use crate::error::ActionError;
    use crate::stub::StubBuilder;

    fn stub(description: &str, uri: &str, bodies: &[&str]) -> StubDefinition {
        bodies
            .iter()
            .fold(StubBuilder::new(description, uri), |b, body| {
                b.response(vec![text(*body)])
            })
            .build()
            .unwrap()
    }

    fn active_registry(stubs: Vec<StubDefinition>) -> StubRegistry {
        let mut registry = StubRegistry::new();
        for s in stubs {
            registry.register(s).unwrap();
        }
        let uris: Vec<String> = registry
            .routes()
            .map(|r| r.stub().endpoint_uri().to_string())
            .collect();
        for uri in uris {
            registry.activate(&mut EndpointHandle::new(uri)).unwrap();
        }
        registry
    }

    fn call(registry: &StubRegistry, endpoint: &str) -> String {
        let mut exchange = Exchange::new(endpoint).with_body("ping");
        registry.dispatch(&mut exchange).unwrap();
        exchange.body_str().unwrap().to_string()
    }

    #[test]
    fn test_multiple_stubs_are_independent() {
        let registry = active_registry(vec![
            stub("one", "http://localhost:8080", &["foo", "baz"]),
            stub("two", "http://localhost:8081", &["<foo/>", "<baz/>"]),
        ]);

        assert_eq!(call(&registry, "http://localhost:8080"), "foo");
        assert_eq!(call(&registry, "http://localhost:8081"), "<foo/>");
        assert_eq!(call(&registry, "HTTP://localhost:8080"), "baz");
        assert_eq!(call(&registry, "http://localhost:8080"), "foo");
        assert_eq!(call(&registry, "http://localhost:8081"), "<baz/>");

        let route = registry.route("http://localhost:8080").unwrap();
        assert_eq!(route.requests_served(), 3);
        assert_eq!(route.route_id(), "stubble.one");
    }

    #[test]
    fn test_duplicate_description_rejected() {
        let mut registry = StubRegistry::new();
        registry.register(stub("same", "seda:a", &["a"])).unwrap();
        let err = registry.register(stub("same", "seda:b", &["b"])).err().unwrap();
        assert!(matches!(err, ConfigurationError::DuplicateDescription(_)));
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let mut registry = StubRegistry::new();
        registry.register(stub("a", "seda:orders", &["a"])).unwrap();
        let err = registry
            .register(stub("b", "SEDA://orders", &["b"]))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::DuplicateEndpoint { .. }));
    }

    #[test]
    fn test_dispatch_requires_activation() {
        let mut registry = StubRegistry::new();
        registry.register(stub("a", "seda:a", &["a"])).unwrap();

        let mut exchange = Exchange::new("seda:a");
        assert!(matches!(
            registry.dispatch(&mut exchange),
            Err(DispatchError::Inactive(_))
        ));

        let mut endpoint = EndpointHandle::new("seda:a");
        registry.activate(&mut endpoint).unwrap();
        assert!(registry.dispatch(&mut exchange).is_ok());
    }

    #[test]
    fn test_unknown_endpoint() {
        let registry = active_registry(vec![stub("a", "seda:a", &["a"])]);
        let mut exchange = Exchange::new("seda:other");
        assert!(matches!(
            registry.dispatch(&mut exchange),
            Err(DispatchError::UnknownEndpoint(_))
        ));
        assert!(registry.activate(&mut EndpointHandle::new("seda:other")).is_err());
    }

    #[test]
    fn test_activation_applies_customizations_once() {
        let mut registry = StubRegistry::new();
        registry
            .register(
                StubBuilder::new("web", "http://localhost:8080")
                    .response(vec![text("ok")])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let mut endpoint = EndpointHandle::new("http://localhost:8080");
        registry.activate(&mut endpoint).unwrap();
        assert_eq!(endpoint.property("bridgeEndpoint"), Some("true"));

        let mut second = EndpointHandle::new("http://localhost:8080");
        registry.activate(&mut second).unwrap();
        assert!(second.properties().is_empty());
    }

    #[test]
    fn test_action_failure_is_counted_and_surfaced() {
        let failing = StubBuilder::new("failing", "seda:fail")
            .response(vec![from_fn(|_| Err(ActionError::failed("backend down")))])
            .build()
            .unwrap();
        let registry = active_registry(vec![failing]);

        let mut exchange = Exchange::new("seda:fail");
        let err = registry.dispatch(&mut exchange).unwrap_err();
        assert!(matches!(err, DispatchError::Action(ActionError::Failed(_))));

        let route = registry.route("seda:fail").unwrap();
        assert_eq!(route.requests_failed(), 1);
        assert_eq!(route.requests_served(), 0);
    }

    #[test]
    fn test_from_config() {
        let config: StubbleConfig = serde_yaml::from_str(
            r#"
settings:
  log_requests: false
stubs:
  - endpoint: "http://localhost:8080"
    responses:
      - body: { type: text, content: foo }
  - endpoint: "http://localhost:8081"
    responses:
      - body: { type: text, content: bar }
"#,
        )
        .unwrap();

        let registry = StubRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        let descriptions: Vec<_> = registry.routes().map(|r| r.stub().description()).collect();
        assert_eq!(descriptions, vec!["Stub 0", "Stub 1"]);
    }

    #[test]
    fn test_default_logs_requests() {
        assert!(StubRegistry::default().log_requests);
        assert!(StubRegistry::new().log_requests);
    }

    #[test]
    fn test_concurrent_dispatch() {
        let registry = active_registry(vec![stub("c", "seda:c", &["a", "b"])]);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        call(&registry, "seda:c");
                    }
                });
            }
        });

        assert_eq!(registry.route("seda:c").unwrap().requests_served(), 1_000);
    }
}
