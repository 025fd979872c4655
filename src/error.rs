//! Error types.
//!
//! Configuration problems surface once, from `StubBuilder::build()`. Action
//! failures surface per request and are never retried or swallowed.

use thiserror::Error;

/// Raised while building a stub. Never raised at request time.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Sequential and random selectors need something to select from
    #[error("stub '{stub}' has no response groups for the {selector} selector")]
    NoResponseGroups { stub: String, selector: &'static str },

    /// Matched selector built without rules or a default
    #[error("stub '{stub}' uses the matched selector but declares no match rules")]
    NoMatchRules { stub: String },

    #[error("invalid endpoint identifier '{uri}': {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    #[error("duplicate stub description '{0}'")]
    DuplicateDescription(String),

    #[error("endpoint '{endpoint}' is already served by stub '{existing}'")]
    DuplicateEndpoint { endpoint: String, existing: String },

    #[error("invalid regex '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid JSON path '{0}'")]
    JsonPath(String),

    #[error("invalid template: {0}")]
    Template(String),

    #[error("invalid response body: {0}")]
    Body(String),

    /// Declared settings the stub would never use
    #[error("stub '{stub}': {setting} would be ignored: {reason}")]
    Unused {
        stub: String,
        setting: String,
        reason: &'static str,
    },
}

/// Failure of a user-supplied or built-in action.
///
/// Actions already applied to the exchange stay applied.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),

    #[error("template rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActionError {
    /// Convenience for closures that fail with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed(message.into())
    }
}

/// Errors surfaced to the host when it hands a request to the registry.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no stub is registered for endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("stub '{0}' has not been activated")]
    Inactive(String),

    #[error(transparent)]
    Action(#[from] ActionError),
}
