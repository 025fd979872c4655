//! Stub definitions.
//!
//! A [`StubBuilder`] collects response groups, repeated actions, a
//! preprocessor, endpoint customizations and the selector choice. `build()`
//! validates everything and freezes it into an immutable [`StubDefinition`]
//! that is shared by every request to the stub's endpoint.

use crate::action::{ActionRef, CompositeAction};
use crate::endpoint::{self, CustomizationRef, Endpoint};
use crate::error::{ActionError, ConfigurationError};
use crate::exchange::Exchange;
use crate::selector::{
    MatchRules, RandomSelector, Selection, Selector, SelectorKind, SequentialSelector,
};
use crate::uri;
use std::fmt;
use tracing::{debug, warn};

/// An immutable stub: which endpoint it answers and how.
pub struct StubDefinition {
    description: String,
    endpoint_uri: String,
    selector: Selector,
    preprocessor: Option<ActionRef>,
    customizations: Vec<CustomizationRef>,
}

impl StubDefinition {
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Normalized endpoint identifier.
    pub fn endpoint_uri(&self) -> &str {
        &self.endpoint_uri
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn preprocessor(&self) -> Option<&ActionRef> {
        self.preprocessor.as_ref()
    }

    pub fn customizations(&self) -> &[CustomizationRef] {
        &self.customizations
    }

    /// Route identifier: `stubble.` followed by the description without whitespace.
    pub fn route_id(&self) -> String {
        let compact: String = self
            .description
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        format!("stubble.{}", compact)
    }

    /// Apply the customizations to the live endpoint, in declaration order.
    pub fn activate(&self, endpoint: &mut dyn Endpoint) {
        for customization in &self.customizations {
            debug!(
                stub = %self.description,
                kind = ?customization.kind(),
                "Applying endpoint customization"
            );
            customization.customize(endpoint);
        }
    }

    /// Run the preprocessor, then the selector, against one request.
    pub fn handle(&self, exchange: &mut Exchange) -> Result<Selection, ActionError> {
        if let Some(preprocessor) = &self.preprocessor {
            preprocessor.apply(exchange)?;
        }
        self.selector.select(exchange)
    }
}

impl fmt::Debug for StubDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubDefinition")
            .field("description", &self.description)
            .field("endpoint_uri", &self.endpoint_uri)
            .field("selector", &self.selector)
            .field("preprocessor", &self.preprocessor.is_some())
            .field("customizations", &self.customizations.len())
            .finish()
    }
}

/// Accumulates a stub's configuration. Nothing is validated until `build()`.
pub struct StubBuilder {
    description: String,
    endpoint_uri: String,
    responses: Vec<Vec<ActionRef>>,
    repeated: Vec<ActionRef>,
    preprocessor: Option<ActionRef>,
    customizations: Vec<CustomizationRef>,
    selector: SelectorKind,
}

impl StubBuilder {
    /// Start a stub answering `endpoint_uri`. The built-in endpoint
    /// customizations are installed up front.
    pub fn new(description: impl Into<String>, endpoint_uri: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            endpoint_uri: endpoint_uri.into(),
            responses: Vec::new(),
            repeated: Vec::new(),
            preprocessor: None,
            customizations: endpoint::builtins(),
            selector: SelectorKind::default(),
        }
    }

    /// Append a response group: all `actions` together produce one response.
    pub fn response(mut self, actions: Vec<ActionRef>) -> Self {
        self.responses.push(actions);
        self
    }

    /// Add actions to the response group at `index`, creating empty groups
    /// up to it if needed. Actions already at `index` are kept.
    pub fn response_at(mut self, index: usize, actions: Vec<ActionRef>) -> Self {
        if index >= self.responses.len() {
            self.responses.resize_with(index + 1, Vec::new);
        }
        self.responses[index].extend(actions);
        self
    }

    /// Action applied before every response, in registration order.
    pub fn repeated(mut self, action: ActionRef) -> Self {
        self.repeated.push(action);
        self
    }

    /// Action run on every request before selection. Last call wins.
    pub fn preprocessor(mut self, action: ActionRef) -> Self {
        self.preprocessor = Some(action);
        self
    }

    /// Add an endpoint customization. A built-in kind that is already
    /// present is ignored.
    pub fn customization(mut self, customization: CustomizationRef) -> Self {
        let kind = customization.kind();
        if kind.is_builtin() && self.customizations.iter().any(|c| c.kind() == kind) {
            debug!(stub = %self.description, ?kind, "Skipping duplicate built-in customization");
            return self;
        }
        self.customizations.push(customization);
        self
    }

    /// Choose the selector. Last call wins.
    pub fn selector(mut self, selector: SelectorKind) -> Self {
        self.selector = selector;
        self
    }

    /// Shorthand for `selector(SelectorKind::Matched(rules))`.
    pub fn matched_responses(self, rules: MatchRules) -> Self {
        self.selector(SelectorKind::Matched(rules))
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn endpoint_uri(&self) -> &str {
        &self.endpoint_uri
    }

    /// Number of actions in each response group, by index.
    pub fn response_sizes(&self) -> Vec<usize> {
        self.responses.iter().map(Vec::len).collect()
    }

    pub fn customizations(&self) -> &[CustomizationRef] {
        &self.customizations
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<StubDefinition, ConfigurationError> {
        let endpoint_uri = uri::normalize(&self.endpoint_uri)?;

        let selector = match self.selector {
            kind @ (SelectorKind::Sequential | SelectorKind::Random) => {
                if self.responses.is_empty() {
                    return Err(ConfigurationError::NoResponseGroups {
                        stub: self.description,
                        selector: kind.name(),
                    });
                }
                let responses: Vec<CompositeAction> = self
                    .responses
                    .iter()
                    .map(|own| CompositeAction::with_repeated(&self.repeated, own))
                    .collect();
                match kind {
                    SelectorKind::Random => Selector::Random(RandomSelector::new(responses)),
                    _ => Selector::Sequential(SequentialSelector::new(responses)),
                }
            }
            SelectorKind::Matched(rules) => {
                if rules.is_empty() {
                    return Err(ConfigurationError::NoMatchRules {
                        stub: self.description,
                    });
                }
                if !self.responses.is_empty() {
                    warn!(
                        stub = %self.description,
                        groups = self.responses.len(),
                        "Response groups are ignored by the matched selector"
                    );
                }
                Selector::Matched(rules.into_selector(&self.repeated))
            }
        };

        Ok(StubDefinition {
            description: self.description,
            endpoint_uri,
            selector,
            preprocessor: self.preprocessor,
            customizations: self.customizations,
        })
    }
}

impl fmt::Debug for StubBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubBuilder")
            .field("description", &self.description)
            .field("endpoint_uri", &self.endpoint_uri)
            .field("responses", &self.response_sizes())
            .field("repeated", &self.repeated.len())
            .field("selector", &self.selector)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{from_fn, header, text, xml};
    use crate::endpoint::{
        CustomizationKind, EndpointHandle, HttpBridge, PayloadFormat, SetProperty,
    };
    use crate::predicate::body_equals;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn serve(stub: &StubDefinition, body: &str) -> Exchange {
        let mut exchange = Exchange::new(stub.endpoint_uri()).with_body(body);
        stub.handle(&mut exchange).unwrap();
        exchange
    }

    #[test]
    fn test_simple_stub_cycles_with_repeated_actions() {
        let stub = StubBuilder::new("foo", "foo.com")
            .response(vec![text("foo")])
            .repeated(header("12", "34"))
            .response(vec![text("baz"), header("foo", "baz")])
            .response(vec![text("moo")])
            .response_at(2, vec![header("1", "2")])
            .build()
            .unwrap();

        assert_eq!(stub.description(), "foo");

        let e = serve(&stub, "a");
        assert_eq!(e.body_str(), Some("foo"));
        assert_eq!(e.header("12"), Some("34"));

        let e = serve(&stub, "b");
        assert_eq!(e.body_str(), Some("baz"));
        assert_eq!(e.header("foo"), Some("baz"));
        assert_eq!(e.header("12"), Some("34"));

        let e = serve(&stub, "c");
        assert_eq!(e.body_str(), Some("moo"));
        assert_eq!(e.header("1"), Some("2"));
        assert_eq!(e.header("12"), Some("34"));

        let e = serve(&stub, "d");
        assert_eq!(e.body_str(), Some("foo"));
    }

    #[test]
    fn test_group_overwrites_repeated_header() {
        let stub = StubBuilder::new("order", "seda:orders")
            .repeated(header("X-Status", "repeated"))
            .repeated(header("X-First", "1"))
            .response(vec![header("X-Status", "own")])
            .response(vec![text("plain")])
            .build()
            .unwrap();

        let e = serve(&stub, "");
        assert_eq!(e.header("X-Status"), Some("own"));
        assert_eq!(
            e.headers().names().collect::<Vec<_>>(),
            vec!["X-Status", "X-First"]
        );

        let e = serve(&stub, "");
        assert_eq!(e.header("X-Status"), Some("repeated"));
        assert_eq!(e.body_str(), Some("plain"));
    }

    #[test]
    fn test_response_at_pads_and_merges() {
        let builder = StubBuilder::new("pad", "seda:pad").response_at(2, vec![text("x")]);
        assert_eq!(builder.response_sizes(), vec![0, 0, 1]);

        let builder = builder.response_at(2, vec![text("y")]);
        assert_eq!(builder.response_sizes(), vec![0, 0, 2]);

        let builder = builder.response(vec![text("z")]);
        assert_eq!(builder.response_sizes(), vec![0, 0, 2, 1]);

        // later action at the same index wins
        let stub = builder.build().unwrap();
        serve(&stub, "");
        serve(&stub, "");
        assert_eq!(serve(&stub, "").body_str(), Some("y"));
    }

    #[test]
    fn test_index_assignment_order_is_irrelevant() {
        let a = StubBuilder::new("a", "seda:a")
            .response_at(1, vec![text("one")])
            .response_at(0, vec![text("zero")]);
        let b = StubBuilder::new("b", "seda:b")
            .response_at(0, vec![text("zero")])
            .response_at(1, vec![text("one")]);
        assert_eq!(a.response_sizes(), b.response_sizes());

        let (a, b) = (a.build().unwrap(), b.build().unwrap());
        for _ in 0..4 {
            assert_eq!(serve(&a, "").body_str(), serve(&b, "").body_str());
        }
    }

    #[test]
    fn test_build_requires_response_groups() {
        let err = StubBuilder::new("empty", "seda:empty").build().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::NoResponseGroups { selector: "sequential", .. }
        ));

        let err = StubBuilder::new("empty", "seda:empty")
            .selector(SelectorKind::Random)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::NoResponseGroups { selector: "random", .. }
        ));

        assert!(StubBuilder::new("one", "seda:one")
            .response(vec![text("ok")])
            .build()
            .is_ok());
    }

    #[test]
    fn test_matched_requires_rules() {
        let err = StubBuilder::new("m", "seda:m")
            .matched_responses(MatchRules::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::NoMatchRules { .. }));

        // a default alone is enough
        assert!(StubBuilder::new("m", "seda:m")
            .matched_responses(MatchRules::new().default_response(vec![text("d")]))
            .build()
            .is_ok());
    }

    #[test]
    fn test_invalid_endpoint_fails_build() {
        let err = StubBuilder::new("bad", "http://bad host")
            .response(vec![text("x")])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_endpoint_is_normalized() {
        let stub = StubBuilder::new("n", "HTTP://localhost:8080/svc?b=1&a=2")
            .response(vec![text("x")])
            .build()
            .unwrap();
        assert_eq!(stub.endpoint_uri(), "http://localhost:8080/svc?a=2&b=1");
        assert_eq!(uri::normalize(stub.endpoint_uri()).unwrap(), stub.endpoint_uri());
    }

    #[test]
    fn test_selector_last_call_wins() {
        let stub = StubBuilder::new("s", "seda:s")
            .selector(SelectorKind::Random)
            .selector(SelectorKind::Sequential)
            .response(vec![text("x")])
            .build()
            .unwrap();
        assert_eq!(stub.selector().name(), "sequential");
    }

    #[test]
    fn test_matched_responses_with_preprocessor() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let stub = StubBuilder::new("foo", "foo.com")
            .preprocessor(from_fn(move |e: &mut Exchange| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                e.set_header("preprocessed", n.to_string());
                Ok(())
            }))
            .matched_responses(
                MatchRules::new()
                    .default_response(vec![text("123")])
                    .rule(body_equals("foo"), vec![xml("<foo/>")])
                    .rule(body_equals("baz"), vec![xml("<baz/>")]),
            )
            .build()
            .unwrap();

        let e = serve(&stub, "baz");
        assert_eq!(e.body_str(), Some("<baz/>"));
        assert_eq!(e.header("preprocessed"), Some("0"));

        let e = serve(&stub, "foo");
        assert_eq!(e.body_str(), Some("<foo/>"));
        assert_eq!(e.header("preprocessed"), Some("1"));

        let e = serve(&stub, "something");
        assert_eq!(e.body_str(), Some("123"));
        assert_eq!(e.header("preprocessed"), Some("2"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_preprocessor_last_call_wins_and_runs_before_selection() {
        let stub = StubBuilder::new("p", "seda:p")
            .preprocessor(header("X-Pre", "first"))
            .preprocessor(from_fn(|e: &mut Exchange| {
                e.set_body("rewritten");
                Ok(())
            }))
            .matched_responses(MatchRules::new().rule(body_equals("rewritten"), vec![text("seen")]))
            .build()
            .unwrap();

        let e = serve(&stub, "original");
        assert_eq!(e.body_str(), Some("seen"));
        assert_eq!(e.header("X-Pre"), None);
    }

    #[test]
    fn test_failing_preprocessor_skips_selection() {
        let stub = StubBuilder::new("f", "seda:f")
            .preprocessor(from_fn(|_| Err(ActionError::failed("bad request"))))
            .response(vec![text("never")])
            .build()
            .unwrap();

        let mut exchange = Exchange::new("seda://f").with_body("in");
        assert!(stub.handle(&mut exchange).is_err());
        assert_eq!(exchange.body_str(), Some("in"));
        if let Selector::Sequential(s) = stub.selector() {
            assert_eq!(s.peek(), 0);
        }
    }

    #[test]
    fn test_builtin_customizations_deduplicate() {
        let stub = StubBuilder::new("foo", "foo.com")
            .response(vec![text("foo")])
            .customization(Arc::new(PayloadFormat))
            .customization(Arc::new(HttpBridge))
            .customization(Arc::new(|_: &mut dyn Endpoint| {}))
            .build()
            .unwrap();

        let kinds: Vec<_> = stub.customizations().iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                CustomizationKind::PayloadFormat,
                CustomizationKind::HttpBridge,
                CustomizationKind::Custom
            ]
        );
    }

    #[test]
    fn test_activate_applies_customizations_in_order() {
        let stub = StubBuilder::new("c", "http://localhost:9000")
            .response(vec![text("x")])
            .customization(Arc::new(SetProperty {
                name: "bridgeEndpoint".to_string(),
                value: "false".to_string(),
            }))
            .build()
            .unwrap();

        let mut endpoint = EndpointHandle::new(stub.endpoint_uri());
        stub.activate(&mut endpoint);
        // the custom directive runs after the built-ins
        assert_eq!(endpoint.property("bridgeEndpoint"), Some("false"));
        assert_eq!(endpoint.property("throwExceptionOnFailure"), Some("false"));
    }

    #[test]
    fn test_route_id_strips_whitespace() {
        let stub = StubBuilder::new("Order service stub", "seda:o")
            .response(vec![text("x")])
            .build()
            .unwrap();
        assert_eq!(stub.route_id(), "stubble.Orderservicestub");
    }
}
