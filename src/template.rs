//! Templated response bodies.
//!
//! Uses Handlebars to render a response body from the incoming request.

use crate::action::Action;
use crate::error::{ActionError, ConfigurationError};
use crate::exchange::Exchange;
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Handlebars registry with the stub helpers installed.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// What a template can see of the request.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    /// Endpoint the request arrived on
    pub endpoint: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Exchange properties
    pub properties: HashMap<String, serde_json::Value>,
    /// Request body (as string, if text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body as JSON (if parseable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl TemplateContext {
    fn from_exchange(exchange: &Exchange) -> Self {
        let body = exchange.body_str().map(String::from);
        let json = body.as_deref().and_then(|s| serde_json::from_str(s).ok());
        Self {
            endpoint: exchange.endpoint().to_string(),
            headers: exchange.headers().to_map(),
            properties: exchange.properties().clone(),
            body,
            json,
        }
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Bodies are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Check that a template parses.
    pub fn validate(template: &str) -> Result<(), ConfigurationError> {
        handlebars::Template::compile(template)
            .map(|_| ())
            .map_err(|e| ConfigurationError::Template(e.to_string()))
    }

    /// Render a template string against the exchange.
    pub fn render(&self, template: &str, exchange: &Exchange) -> Result<String, ActionError> {
        let ctx = TemplateContext::from_exchange(exchange);
        Ok(self.handlebars.render_template(template, &ctx)?)
    }

    /// Render every string inside a JSON value.
    pub fn render_json(
        &self,
        value: &serde_json::Value,
        exchange: &Exchange,
    ) -> Result<serde_json::Value, ActionError> {
        let ctx = TemplateContext::from_exchange(exchange);
        self.render_json_value(value, &ctx)
    }

    fn render_json_value(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext,
    ) -> Result<serde_json::Value, ActionError> {
        match value {
            serde_json::Value::String(s) if s.contains("{{") => Ok(serde_json::Value::String(
                self.handlebars.render_template(s, ctx)?,
            )),
            serde_json::Value::Array(arr) => arr
                .iter()
                .map(|v| self.render_json_value(v, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            serde_json::Value::Object(obj) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json_value(v, ctx)?);
                }
                Ok(serde_json::Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

enum TemplateBody {
    Text(String),
    Json(serde_json::Value),
}

/// Sets the body by rendering a template against the request.
pub struct RenderTemplate {
    engine: Arc<TemplateEngine>,
    body: TemplateBody,
    content_type: String,
}

impl RenderTemplate {
    /// Text template. Fails with a configuration error if it does not parse.
    pub fn text(
        engine: Arc<TemplateEngine>,
        template: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let template = template.into();
        TemplateEngine::validate(&template)?;
        Ok(Self {
            engine,
            body: TemplateBody::Text(template),
            content_type: content_type.into(),
        })
    }

    /// JSON document whose string leaves are templates.
    pub fn json(
        engine: Arc<TemplateEngine>,
        value: serde_json::Value,
    ) -> Result<Self, ConfigurationError> {
        validate_json_strings(&value)?;
        Ok(Self {
            engine,
            body: TemplateBody::Json(value),
            content_type: "application/json".to_string(),
        })
    }
}

fn validate_json_strings(value: &serde_json::Value) -> Result<(), ConfigurationError> {
    match value {
        serde_json::Value::String(s) => TemplateEngine::validate(s),
        serde_json::Value::Array(arr) => arr.iter().try_for_each(validate_json_strings),
        serde_json::Value::Object(obj) => obj.values().try_for_each(validate_json_strings),
        _ => Ok(()),
    }
}

impl Action for RenderTemplate {
    fn apply(&self, exchange: &mut Exchange) -> Result<(), ActionError> {
        let rendered = match &self.body {
            TemplateBody::Text(template) => self.engine.render(template, exchange)?.into_bytes(),
            TemplateBody::Json(value) => {
                serde_json::to_vec(&self.engine.render_json(value, exchange)?)?
            }
        };
        exchange.set_body(rendered);
        exchange.set_header("Content-Type", self.content_type.as_str());
        Ok(())
    }
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");
    out.write(&chrono::Utc::now().format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);
    let value = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    out.write(&value.to_string())?;
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}
