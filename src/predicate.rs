//! Request predicates for the matched selector.
//!
//! A predicate inspects the (preprocessed) request and says whether a match
//! rule applies. Closures work directly; [`RequestPredicate`] compiles the
//! declarative matchers from the YAML configuration.

use crate::config::{BodyMatcher, HeaderMatcher, RequestMatcher};
use crate::error::ConfigurationError;
use crate::exchange::Exchange;
use regex::Regex;
use std::sync::Arc;

/// A test over an incoming request.
pub trait Predicate: Send + Sync {
    fn matches(&self, exchange: &Exchange) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Exchange) -> bool + Send + Sync,
{
    fn matches(&self, exchange: &Exchange) -> bool {
        self(exchange)
    }
}

pub type PredicateRef = Arc<dyn Predicate>;

/// Body equals `value` exactly.
pub fn body_equals(value: impl Into<String>) -> PredicateRef {
    let value = value.into();
    Arc::new(move |exchange: &Exchange| exchange.body_str() == Some(value.as_str()))
}

/// Body contains `value`.
pub fn body_contains(value: impl Into<String>) -> PredicateRef {
    let value = value.into();
    Arc::new(move |exchange: &Exchange| {
        exchange
            .body_str()
            .map(|b| b.contains(value.as_str()))
            .unwrap_or(false)
    })
}

/// Header `name` is present with exactly `value`.
pub fn header_equals(name: impl Into<String>, value: impl Into<String>) -> PredicateRef {
    let name = name.into();
    let value = value.into();
    Arc::new(move |exchange: &Exchange| exchange.header(&name) == Some(value.as_str()))
}

enum CompiledHeaderMatcher {
    Exact(String),
    Regex(Regex),
    Glob(globset::GlobMatcher),
    Contains(String),
    Present,
    Absent,
}

enum CompiledBodyMatcher {
    Exact(String),
    Regex(Regex),
    Contains(String),
    Json,
    JsonPath(Vec<(jsonpath_rust::JsonPath, serde_json::Value)>),
    Empty,
}

fn compile_regex(pattern: &str) -> Result<Regex, ConfigurationError> {
    Regex::new(pattern).map_err(|source| ConfigurationError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

/// All configured header and body conditions must hold.
pub struct RequestPredicate {
    headers: Vec<(String, CompiledHeaderMatcher)>,
    body: Option<CompiledBodyMatcher>,
}

impl RequestPredicate {
    /// Compile a declarative matcher, rejecting bad regexes, globs and paths.
    pub fn compile(matcher: &RequestMatcher) -> Result<Self, ConfigurationError> {
        let mut headers = Vec::with_capacity(matcher.headers.len());
        for (name, hm) in &matcher.headers {
            let compiled = match hm {
                HeaderMatcher::Exact { value } => CompiledHeaderMatcher::Exact(value.clone()),
                HeaderMatcher::Regex { pattern } => {
                    CompiledHeaderMatcher::Regex(compile_regex(pattern)?)
                }
                HeaderMatcher::Glob { pattern } => {
                    let glob =
                        globset::Glob::new(pattern).map_err(|source| ConfigurationError::Glob {
                            pattern: pattern.clone(),
                            source,
                        })?;
                    CompiledHeaderMatcher::Glob(glob.compile_matcher())
                }
                HeaderMatcher::Contains { value } => {
                    CompiledHeaderMatcher::Contains(value.clone())
                }
                HeaderMatcher::Present => CompiledHeaderMatcher::Present,
                HeaderMatcher::Absent => CompiledHeaderMatcher::Absent,
            };
            headers.push((name.clone(), compiled));
        }

        let body = match &matcher.body {
            None => None,
            Some(BodyMatcher::Exact { value }) => Some(CompiledBodyMatcher::Exact(value.clone())),
            Some(BodyMatcher::Regex { pattern }) => {
                Some(CompiledBodyMatcher::Regex(compile_regex(pattern)?))
            }
            Some(BodyMatcher::Contains { value }) => {
                Some(CompiledBodyMatcher::Contains(value.clone()))
            }
            Some(BodyMatcher::Json) => Some(CompiledBodyMatcher::Json),
            Some(BodyMatcher::JsonPath { expressions }) => {
                let mut paths = Vec::with_capacity(expressions.len());
                for (expr, expected) in expressions {
                    let path = jsonpath_rust::JsonPath::try_from(expr.as_str())
                        .map_err(|_| ConfigurationError::JsonPath(expr.clone()))?;
                    paths.push((path, expected.clone()));
                }
                Some(CompiledBodyMatcher::JsonPath(paths))
            }
            Some(BodyMatcher::Empty) => Some(CompiledBodyMatcher::Empty),
        };

        Ok(Self { headers, body })
    }

    fn matches_header(exchange: &Exchange, name: &str, matcher: &CompiledHeaderMatcher) -> bool {
        let value = exchange.header(name);
        match matcher {
            CompiledHeaderMatcher::Exact(expected) => value == Some(expected.as_str()),
            CompiledHeaderMatcher::Regex(regex) => value.map(|v| regex.is_match(v)).unwrap_or(false),
            CompiledHeaderMatcher::Glob(glob) => value.map(|v| glob.is_match(v)).unwrap_or(false),
            CompiledHeaderMatcher::Contains(needle) => {
                value.map(|v| v.contains(needle.as_str())).unwrap_or(false)
            }
            CompiledHeaderMatcher::Present => value.is_some(),
            CompiledHeaderMatcher::Absent => value.is_none(),
        }
    }

    fn matches_body(exchange: &Exchange, matcher: &CompiledBodyMatcher) -> bool {
        let body = exchange.body_str();
        match matcher {
            CompiledBodyMatcher::Exact(expected) => body == Some(expected.as_str()),
            CompiledBodyMatcher::Regex(regex) => body.map(|b| regex.is_match(b)).unwrap_or(false),
            CompiledBodyMatcher::Contains(needle) => {
                body.map(|b| b.contains(needle.as_str())).unwrap_or(false)
            }
            CompiledBodyMatcher::Json => body
                .map(|b| serde_json::from_str::<serde_json::Value>(b).is_ok())
                .unwrap_or(false),
            CompiledBodyMatcher::JsonPath(paths) => {
                let Some(json) = body.and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok()) else {
                    return false;
                };
                paths.iter().all(|(path, expected)| {
                    let results = path.find(&json);
                    // matches come back wrapped in an array
                    let found = match &results {
                        serde_json::Value::Array(items) if items.len() == 1 => &items[0],
                        other => other,
                    };
                    // null means "path resolves to anything"
                    if expected.is_null() {
                        !found.is_null() && results != serde_json::Value::Array(Vec::new())
                    } else {
                        found == expected || results == *expected
                    }
                })
            }
            CompiledBodyMatcher::Empty => exchange.body().is_empty(),
        }
    }
}

impl Predicate for RequestPredicate {
    fn matches(&self, exchange: &Exchange) -> bool {
        self.headers
            .iter()
            .all(|(name, matcher)| Self::matches_header(exchange, name, matcher))
            && self
                .body
                .as_ref()
                .map(|matcher| Self::matches_body(exchange, matcher))
                .unwrap_or(true)
    }
}
