//! Configuration for stubble.
//!
//! Declares stubs in YAML and compiles them into [`StubBuilder`]s.

use crate::action::{self, ActionRef, Delay, SetBody, SetHeaders};
use crate::endpoint::{CustomizationRef, HttpBridge, PayloadFormat, SetProperty};
use crate::error::ConfigurationError;
use crate::predicate::RequestPredicate;
use crate::selector::{MatchRules, SelectorKind};
use crate::stub::{StubBuilder, StubDefinition};
use crate::template::{RenderTemplate, TemplateEngine};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StubbleConfig {
    /// List of stub definitions
    #[serde(default)]
    pub stubs: Vec<StubConfig>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl StubbleConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration by building every stub.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.build_stubs()?;
        Ok(())
    }

    /// Build every stub, sharing one template engine.
    pub fn build_stubs(&self) -> anyhow::Result<Vec<StubDefinition>> {
        let engine = Arc::new(TemplateEngine::new());
        self.stubs
            .iter()
            .enumerate()
            .map(|(i, stub)| {
                stub.builder(i, &engine)
                    .and_then(StubBuilder::build)
                    .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))
            })
            .collect()
    }
}

/// A single stub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubConfig {
    /// Human readable label, unique per run (defaults to "Stub <n>")
    #[serde(default)]
    pub description: Option<String>,

    /// Endpoint this stub answers
    pub endpoint: String,

    /// Selection strategy; inferred from `matched` when absent
    #[serde(default)]
    pub selector: Option<SelectorConfig>,

    /// Applied to each request before selection
    #[serde(default)]
    pub preprocessor: Option<ResponseConfig>,

    /// Applied before every response
    #[serde(default)]
    pub repeated: Vec<ResponseConfig>,

    /// Response groups, for the sequential and random selectors
    #[serde(default)]
    pub responses: Vec<ResponseConfig>,

    /// Match rules, for the matched selector
    #[serde(default)]
    pub matched: Vec<MatchedConfig>,

    /// Response when no match rule applies
    #[serde(default)]
    pub default_response: Option<ResponseConfig>,

    /// Endpoint customizations
    #[serde(default)]
    pub customizations: Vec<CustomizationConfig>,
}

impl StubConfig {
    fn selector_config(&self) -> SelectorConfig {
        self.selector.unwrap_or(
            if self.matched.is_empty() && self.default_response.is_none() {
                SelectorConfig::Sequential
            } else {
                SelectorConfig::Matched
            },
        )
    }

    /// Reject settings the chosen selector or section never reads.
    fn check_unused(&self, stub: &str) -> Result<(), ConfigurationError> {
        let unused = |setting: String, reason: &'static str| ConfigurationError::Unused {
            stub: stub.to_string(),
            setting,
            reason,
        };

        if matches!(
            self.selector,
            Some(SelectorConfig::Sequential | SelectorConfig::Random)
        ) {
            if !self.matched.is_empty() {
                return Err(unused(
                    "matched".to_string(),
                    "match rules need the matched selector",
                ));
            }
            if self.default_response.is_some() {
                return Err(unused(
                    "default_response".to_string(),
                    "a default response needs the matched selector",
                ));
            }
        }

        let only_responses = "index is only read for responses";
        if self.preprocessor.as_ref().is_some_and(|p| p.index.is_some()) {
            return Err(unused("preprocessor.index".to_string(), only_responses));
        }
        if let Some(i) = self.repeated.iter().position(|r| r.index.is_some()) {
            return Err(unused(format!("repeated[{}].index", i), only_responses));
        }
        if let Some(i) = self.matched.iter().position(|m| m.response.index.is_some()) {
            return Err(unused(format!("matched[{}].response.index", i), only_responses));
        }
        if self.default_response.as_ref().is_some_and(|d| d.index.is_some()) {
            return Err(unused("default_response.index".to_string(), only_responses));
        }
        Ok(())
    }

    /// Turn the declaration into a builder. `position` names unlabelled stubs.
    pub fn builder(
        &self,
        position: usize,
        engine: &Arc<TemplateEngine>,
    ) -> Result<StubBuilder, ConfigurationError> {
        let description = self
            .description
            .clone()
            .unwrap_or_else(|| format!("Stub {}", position));
        self.check_unused(&description)?;
        let mut builder = StubBuilder::new(description, self.endpoint.clone());

        if let Some(pre) = &self.preprocessor {
            builder = builder.preprocessor(Arc::new(action::CompositeAction::new(
                pre.actions(engine)?,
            )));
        }
        for repeated in &self.repeated {
            for action in repeated.actions(engine)? {
                builder = builder.repeated(action);
            }
        }
        for response in &self.responses {
            let actions = response.actions(engine)?;
            builder = match response.index {
                Some(index) => builder.response_at(index, actions),
                None => builder.response(actions),
            };
        }
        for customization in &self.customizations {
            builder = builder.customization(customization.to_customization());
        }

        let selector = match self.selector_config() {
            SelectorConfig::Sequential => SelectorKind::Sequential,
            SelectorConfig::Random => SelectorKind::Random,
            SelectorConfig::Matched => {
                let mut rules = MatchRules::new();
                for rule in &self.matched {
                    let predicate = RequestPredicate::compile(&rule.when)?;
                    rules = rules.rule(Arc::new(predicate), rule.response.actions(engine)?);
                }
                if let Some(default) = &self.default_response {
                    rules = rules.default_response(default.actions(engine)?);
                }
                SelectorKind::Matched(rules)
            }
        };

        Ok(builder.selector(selector))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorConfig {
    Sequential,
    Random,
    Matched,
}

/// A match rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchedConfig {
    /// Conditions on the request
    #[serde(default)]
    pub when: RequestMatcher,

    /// Response when the conditions hold
    pub response: ResponseConfig,
}

/// Request matching configuration. All conditions must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// Header matching
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderMatcher>,

    /// Body matching
    #[serde(default)]
    pub body: Option<BodyMatcher>,
}

/// Header matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
    /// Value must contain substring
    Contains { value: String },
    /// Header must be present (any value)
    Present,
    /// Header must be absent
    Absent,
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// JSON path matching
    JsonPath {
        /// JSON path expressions and expected values
        expressions: HashMap<String, serde_json::Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

/// One response: the actions that produce it, in this order: delay,
/// headers, body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseConfig {
    /// Position in the response sequence; only read for `responses`,
    /// which are appended when it is absent
    #[serde(default)]
    pub index: Option<usize>,

    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Render the body as a Handlebars template
    #[serde(default)]
    pub template: bool,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<DelayConfig>,
}

impl ResponseConfig {
    /// Compile into actions.
    pub fn actions(&self, engine: &Arc<TemplateEngine>) -> Result<Vec<ActionRef>, ConfigurationError> {
        let mut actions: Vec<ActionRef> = Vec::new();

        if let Some(delay) = &self.delay {
            actions.push(Arc::new(Delay::new(delay.clone())));
        }

        if !self.headers.is_empty() {
            let set = self
                .headers
                .iter()
                .fold(SetHeaders::new(), |set, (k, v)| set.header(k, v));
            actions.push(Arc::new(set));
        }

        if let Some(body) = &self.body {
            actions.push(body.to_action(self.template, engine)?);
        }

        Ok(actions)
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// XML body
    Xml { content: String },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigurationError> {
        match self {
            ResponseBody::Text { content } | ResponseBody::Xml { content } => {
                Ok(content.as_bytes().to_vec())
            }
            ResponseBody::Json { content } => Ok(content.to_string().into_bytes()),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| ConfigurationError::Body(format!("invalid base64: {}", e)))
            }
            ResponseBody::File { path } => std::fs::read(path)
                .map_err(|e| ConfigurationError::Body(format!("failed to read file {}: {}", path, e))),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Xml { .. } => "application/xml",
            ResponseBody::Base64 { .. } | ResponseBody::File { .. } => "application/octet-stream",
        }
    }

    fn to_action(
        &self,
        template: bool,
        engine: &Arc<TemplateEngine>,
    ) -> Result<ActionRef, ConfigurationError> {
        if template {
            match self {
                ResponseBody::Text { content } | ResponseBody::Xml { content } => {
                    return Ok(Arc::new(RenderTemplate::text(
                        engine.clone(),
                        content.clone(),
                        self.content_type(),
                    )?));
                }
                ResponseBody::Json { content } => {
                    return Ok(Arc::new(RenderTemplate::json(engine.clone(), content.clone())?));
                }
                // binary bodies are never templated
                ResponseBody::Base64 { .. } | ResponseBody::File { .. } => {}
            }
        }
        // files are read once, at build time
        Ok(Arc::new(
            SetBody::new(self.to_bytes()?).with_content_type(self.content_type()),
        ))
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            return rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }
}

/// Endpoint customization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomizationConfig {
    PayloadFormat,
    HttpBridge,
    Property { name: String, value: String },
}

impl CustomizationConfig {
    fn to_customization(&self) -> CustomizationRef {
        match self {
            CustomizationConfig::PayloadFormat => Arc::new(PayloadFormat),
            CustomizationConfig::HttpBridge => Arc::new(HttpBridge),
            CustomizationConfig::Property { name, value } => Arc::new(SetProperty {
                name: name.clone(),
                value: value.clone(),
            }),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Debug-log request and response bodies
    #[serde(default = "default_true")]
    pub log_requests: bool,

    /// Case-insensitive header keys on exchanges built by the host
    #[serde(default = "default_true")]
    pub case_insensitive_headers: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_requests: true,
            case_insensitive_headers: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::selector::Selection;
    use std::io::Write;

    fn build(yaml: &str) -> Vec<StubDefinition> {
        let config: StubbleConfig = serde_yaml::from_str(yaml).unwrap();
        config.build_stubs().unwrap()
    }

    #[test]
    fn test_parse_sequential_stub() {
        let stubs = build(
            r#"
stubs:
  - description: ping
    endpoint: "http://localhost:8080"
    responses:
      - body:
          type: text
          content: foo
      - body:
          type: text
          content: baz
"#,
        );
        assert_eq!(stubs.len(), 1);
        let stub = &stubs[0];
        assert_eq!(stub.selector().name(), "sequential");

        let bodies: Vec<_> = (0..3)
            .map(|_| {
                let mut e = Exchange::new(stub.endpoint_uri());
                stub.handle(&mut e).unwrap();
                e.body_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(bodies, vec!["foo", "baz", "foo"]);
    }

    #[test]
    fn test_indexed_responses_and_repeated() {
        let stubs = build(
            r#"
stubs:
  - endpoint: "seda:orders"
    repeated:
      - headers:
          X-Stub: "true"
    responses:
      - index: 1
        body:
          type: json
          content:
            status: second
      - index: 0
        headers:
          X-Stub: overridden
        body:
          type: xml
          content: "<first/>"
"#,
        );
        let stub = &stubs[0];
        assert_eq!(stub.description(), "Stub 0");

        let mut e = Exchange::new(stub.endpoint_uri());
        stub.handle(&mut e).unwrap();
        assert_eq!(e.body_str(), Some("<first/>"));
        assert_eq!(e.header("X-Stub"), Some("overridden"));
        assert_eq!(e.header("Content-Type"), Some("application/xml"));

        let mut e = Exchange::new(stub.endpoint_uri());
        stub.handle(&mut e).unwrap();
        let body: serde_json::Value = serde_json::from_slice(e.body()).unwrap();
        assert_eq!(body["status"], "second");
        assert_eq!(e.header("X-Stub"), Some("true"));
    }

    #[test]
    fn test_matched_selector_is_inferred() {
        let stubs = build(
            r#"
stubs:
  - description: matched
    endpoint: "http://localhost:8081/orders"
    matched:
      - when:
          body:
            type: json_path
            expressions:
              "$.kind": "refund"
        response:
          body:
            type: text
            content: refunded
      - when:
          headers:
            X-Priority:
              type: exact
              value: high
        response:
          template: true
          body:
            type: text
            content: "rush {{headers.X-Priority}}"
    default_response:
      body:
        type: text
        content: accepted
"#,
        );
        let stub = &stubs[0];
        assert_eq!(stub.selector().name(), "matched");

        let mut e = Exchange::new(stub.endpoint_uri()).with_header("X-Priority", "high");
        assert_eq!(stub.handle(&mut e).unwrap(), Selection::Rule(1));
        assert_eq!(e.body_str(), Some("rush high"));

        let mut e = Exchange::new(stub.endpoint_uri()).with_body("plain");
        assert_eq!(stub.handle(&mut e).unwrap(), Selection::Default);
        assert_eq!(e.body_str(), Some("accepted"));
    }

    #[test]
    fn test_random_selector_from_yaml() {
        let stubs = build(
            r#"
stubs:
  - endpoint: "seda:random"
    selector: random
    responses:
      - body: { type: text, content: a }
      - body: { type: base64, content: "Yg==" }
"#,
        );
        let stub = &stubs[0];
        assert_eq!(stub.selector().name(), "random");

        let mut e = Exchange::new(stub.endpoint_uri());
        stub.handle(&mut e).unwrap();
        assert!(matches!(e.body_str(), Some("a") | Some("b")));
    }

    #[test]
    fn test_customizations_from_yaml() {
        let stubs = build(
            r#"
stubs:
  - endpoint: "http://localhost:9000"
    responses:
      - body: { type: text, content: ok }
    customizations:
      - type: http_bridge
      - type: property
        name: timeout
        value: "30"
"#,
        );
        assert_eq!(stubs[0].customizations().len(), 3);
    }

    #[test]
    fn test_invalid_stub_reports_position() {
        let config: StubbleConfig = serde_yaml::from_str(
            r#"
stubs:
  - endpoint: "seda:ok"
    responses:
      - body: { type: text, content: ok }
  - endpoint: "seda:empty"
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Stub 1"), "{}", err);
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let config: StubbleConfig = serde_yaml::from_str(
            r#"
stubs:
  - endpoint: "seda:m"
    matched:
      - when:
          body: { type: regex, pattern: "(" }
        response:
          body: { type: text, content: x }
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_sequential_with_match_rules_rejected() {
        let config: StubbleConfig = serde_yaml::from_str(
            r#"
stubs:
  - endpoint: "seda:s"
    selector: sequential
    responses:
      - body: { type: text, content: a }
    matched:
      - when:
          body: { type: contains, value: x }
        response:
          body: { type: text, content: x }
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("matched would be ignored"), "{}", err);

        let config: StubbleConfig = serde_yaml::from_str(
            r#"
stubs:
  - endpoint: "seda:r"
    selector: random
    responses:
      - body: { type: text, content: a }
    default_response:
      body: { type: text, content: d }
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default_response would be ignored"), "{}", err);
    }

    #[test]
    fn test_index_outside_responses_rejected() {
        let config: StubbleConfig = serde_yaml::from_str(
            r#"
stubs:
  - endpoint: "seda:i"
    repeated:
      - index: 2
        headers: { X-Stub: "true" }
    responses:
      - body: { type: text, content: a }
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("repeated[0].index"), "{}", err);

        let config: StubbleConfig = serde_yaml::from_str(
            r#"
stubs:
  - endpoint: "seda:j"
    matched:
      - when:
          body: { type: contains, value: x }
        response:
          index: 0
          body: { type: text, content: x }
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("matched[0].response.index"), "{}", err);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<StubbleConfig, _> = serde_yaml::from_str(
            r#"
stubs:
  - endpoint: "seda:x"
    response: {}
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
settings:
  log_requests: false
stubs:
  - endpoint: "seda:file"
    responses:
      - body: {{ type: text, content: ok }}
"#
        )
        .unwrap();

        let config = StubbleConfig::from_file(file.path()).unwrap();
        assert!(!config.settings.log_requests);
        assert!(config.settings.case_insensitive_headers);
        assert_eq!(config.stubs.len(), 1);
    }

    #[test]
    fn test_delay_calculation() {
        let fixed = DelayConfig {
            fixed_ms: 100,
            min_ms: 0,
            max_ms: 0,
        };
        assert_eq!(fixed.calculate(), 100);

        let range = DelayConfig {
            fixed_ms: 0,
            min_ms: 50,
            max_ms: 150,
        };
        assert!((50..=150).contains(&range.calculate()));
    }

    #[test]
    fn test_response_body_to_bytes() {
        let text = ResponseBody::Text {
            content: "hello".to_string(),
        };
        assert_eq!(text.to_bytes().unwrap(), b"hello");

        let bad = ResponseBody::Base64 {
            content: "***".to_string(),
        };
        assert!(matches!(bad.to_bytes(), Err(ConfigurationError::Body(_))));
    }
}
