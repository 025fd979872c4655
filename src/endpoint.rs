//! Endpoint handles and the customizations applied to them at activation.

use crate::uri;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The live transport endpoint a stub is bound to, as seen by customizations.
pub trait Endpoint {
    fn uri(&self) -> &str;
    fn property(&self, name: &str) -> Option<&str>;
    fn set_property(&mut self, name: &str, value: &str);
}

/// A plain property-bag endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointHandle {
    uri: String,
    properties: BTreeMap<String, String>,
}

impl EndpointHandle {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

impl Endpoint for EndpointHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }
}

/// Kind of a customization.
///
/// Built-in kinds are installed on every stub and collapse to a single
/// instance; `Custom` directives are always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomizationKind {
    /// Raw payload instead of bound objects on SOAP endpoints
    PayloadFormat,
    /// Pass responses straight through on HTTP endpoints
    HttpBridge,
    Custom,
}

impl CustomizationKind {
    pub fn is_builtin(self) -> bool {
        !matches!(self, CustomizationKind::Custom)
    }
}

/// A one-time directive applied to the endpoint before any request is served.
pub trait EndpointCustomization: Send + Sync {
    fn kind(&self) -> CustomizationKind {
        CustomizationKind::Custom
    }

    fn customize(&self, endpoint: &mut dyn Endpoint);
}

impl<F> EndpointCustomization for F
where
    F: Fn(&mut dyn Endpoint) + Send + Sync,
{
    fn customize(&self, endpoint: &mut dyn Endpoint) {
        self(endpoint)
    }
}

pub type CustomizationRef = Arc<dyn EndpointCustomization>;

/// Sets `dataFormat=PAYLOAD` on `cxf` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadFormat;

impl EndpointCustomization for PayloadFormat {
    fn kind(&self) -> CustomizationKind {
        CustomizationKind::PayloadFormat
    }

    fn customize(&self, endpoint: &mut dyn Endpoint) {
        if uri::scheme(endpoint.uri()) == Some("cxf") {
            endpoint.set_property("dataFormat", "PAYLOAD");
        }
    }
}

/// Bridges HTTP endpoints so error statuses are returned, not raised.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpBridge;

const HTTP_SCHEMES: &[&str] = &["http", "https", "jetty", "netty-http", "undertow"];

impl EndpointCustomization for HttpBridge {
    fn kind(&self) -> CustomizationKind {
        CustomizationKind::HttpBridge
    }

    fn customize(&self, endpoint: &mut dyn Endpoint) {
        let is_http = uri::scheme(endpoint.uri())
            .map(|s| HTTP_SCHEMES.contains(&s))
            .unwrap_or(false);
        if is_http {
            endpoint.set_property("bridgeEndpoint", "true");
            endpoint.set_property("throwExceptionOnFailure", "false");
        }
    }
}

/// Sets one endpoint property.
#[derive(Debug, Clone)]
pub struct SetProperty {
    pub name: String,
    pub value: String,
}

impl EndpointCustomization for SetProperty {
    fn customize(&self, endpoint: &mut dyn Endpoint) {
        endpoint.set_property(&self.name, &self.value);
    }
}

/// The customizations every stub starts with.
pub fn builtins() -> Vec<CustomizationRef> {
    vec![Arc::new(PayloadFormat), Arc::new(HttpBridge)]
}
