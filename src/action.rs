//! Response actions.
//!
//! An action mutates an exchange: sets the body, adds a header, waits. Stubs
//! treat actions as opaque; anything implementing [`Action`] (including plain
//! closures) can be used as a response, a repeated action or a preprocessor.

use crate::config::DelayConfig;
use crate::error::ActionError;
use crate::exchange::Exchange;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A unit of work applied to an exchange.
///
/// Actions are shared across every concurrent request to a stub and must not
/// rely on exclusive access to themselves.
pub trait Action: Send + Sync {
    fn apply(&self, exchange: &mut Exchange) -> Result<(), ActionError>;
}

impl<F> Action for F
where
    F: Fn(&mut Exchange) -> Result<(), ActionError> + Send + Sync,
{
    fn apply(&self, exchange: &mut Exchange) -> Result<(), ActionError> {
        self(exchange)
    }
}

/// Shared handle to an action.
pub type ActionRef = Arc<dyn Action>;

/// Applies a fixed sequence of actions to one exchange, in order.
///
/// The first failing action aborts the rest and its error is returned as is.
#[derive(Clone, Default)]
pub struct CompositeAction {
    actions: Vec<ActionRef>,
}

impl CompositeAction {
    pub fn new(actions: Vec<ActionRef>) -> Self {
        Self { actions }
    }

    /// Repeated actions first, in registration order, then the group's own.
    pub fn with_repeated(repeated: &[ActionRef], own: &[ActionRef]) -> Self {
        let actions = repeated.iter().chain(own.iter()).cloned().collect();
        Self { actions }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Action for CompositeAction {
    fn apply(&self, exchange: &mut Exchange) -> Result<(), ActionError> {
        for action in &self.actions {
            action.apply(exchange)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CompositeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeAction")
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Replaces the body.
#[derive(Debug, Clone)]
pub struct SetBody {
    body: Vec<u8>,
    content_type: Option<String>,
}

impl SetBody {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
        }
    }

    /// Also set `Content-Type` when applied.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl Action for SetBody {
    fn apply(&self, exchange: &mut Exchange) -> Result<(), ActionError> {
        exchange.set_body(self.body.clone());
        if let Some(content_type) = &self.content_type {
            exchange.set_header("Content-Type", content_type.as_str());
        }
        Ok(())
    }
}

/// Sets headers, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SetHeaders {
    headers: Vec<(String, String)>,
}

impl SetHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Action for SetHeaders {
    fn apply(&self, exchange: &mut Exchange) -> Result<(), ActionError> {
        for (name, value) in &self.headers {
            exchange.set_header(name.as_str(), value.as_str());
        }
        Ok(())
    }
}

/// Blocks the calling request for a fixed or jittered duration.
///
/// Only the request being served waits; other requests to the same stub are
/// unaffected.
#[derive(Debug, Clone)]
pub struct Delay {
    config: DelayConfig,
}

impl Delay {
    pub fn new(config: DelayConfig) -> Self {
        Self { config }
    }
}

impl Action for Delay {
    fn apply(&self, _exchange: &mut Exchange) -> Result<(), ActionError> {
        let delay_ms = self.config.calculate();
        if delay_ms > 0 {
            debug!(delay_ms, "Applying delay");
            std::thread::sleep(Duration::from_millis(delay_ms));
        }
        Ok(())
    }
}

/// Plain text body.
pub fn text(body: impl Into<String>) -> ActionRef {
    Arc::new(SetBody::new(body.into()).with_content_type("text/plain"))
}

/// XML body.
pub fn xml(body: impl Into<String>) -> ActionRef {
    Arc::new(SetBody::new(body.into()).with_content_type("application/xml"))
}

/// JSON body, serialized once up front.
pub fn json(value: &serde_json::Value) -> ActionRef {
    Arc::new(SetBody::new(value.to_string()).with_content_type("application/json"))
}

/// A single header.
pub fn header(name: impl Into<String>, value: impl Into<String>) -> ActionRef {
    Arc::new(SetHeaders::new().header(name, value))
}

/// Several headers at once.
pub fn headers<I, K, V>(pairs: I) -> ActionRef
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let set = pairs
        .into_iter()
        .fold(SetHeaders::new(), |set, (k, v)| set.header(k, v));
    Arc::new(set)
}

/// Wrap a closure as a shared action.
pub fn from_fn<F>(f: F) -> ActionRef
where
    F: Fn(&mut Exchange) -> Result<(), ActionError> + Send + Sync + 'static,
{
    Arc::new(f)
}
