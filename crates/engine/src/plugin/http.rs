//! `http.get`, `http.post`, `http.put`, `http.patch` and `http.delete`.
//!
//! Requests run asynchronously and are awaited before the next step. The
//! plugin entry in the job document may set `base_url` and default
//! `headers`. A step body carries `url`, `headers`, `query`, `json` and
//! `body`; the result is `{status, headers, body}` with a JSON body parsed
//! when possible.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value, json};
use tracing::debug;
use url::Url;

use super::{DynamicResolver, Operation, Plugin, PluginRegistry, ResolvedOperation, StepFuture, StepHandler, body_map, unknown_action};
use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::values::to_text;

const PLUGIN_NAME: &str = "http";

#[derive(Debug, Default)]
pub struct HttpPlugin;

impl Plugin for HttpPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn init(&self, registry: &mut PluginRegistry, config: &Value) -> EngineResult<()> {
        let settings = HttpSettings::from_config(config).map_err(EngineError::Other)?;
        registry.register(PLUGIN_NAME, Arc::new(HttpStep { settings }));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct HttpSettings {
    base_url: Option<Url>,
    headers: Map<String, Value>,
}

impl HttpSettings {
    fn from_config(config: &Value) -> anyhow::Result<Self> {
        let base_url = match config.get("base_url") {
            Some(Value::String(raw)) if !raw.is_empty() => {
                let normalized = if raw.ends_with('/') { raw.clone() } else { format!("{raw}/") };
                Some(Url::parse(&normalized).with_context(|| format!("invalid http base_url '{raw}'"))?)
            }
            _ => None,
        };
        Ok(Self {
            base_url,
            headers: config.get("headers").and_then(Value::as_object).cloned().unwrap_or_default(),
        })
    }

    fn request_url(&self, raw: &str) -> anyhow::Result<Url> {
        match &self.base_url {
            Some(base) if !raw.contains("://") => base
                .join(raw.trim_start_matches('/'))
                .with_context(|| format!("cannot join '{raw}' onto {base}")),
            _ => Url::parse(raw).with_context(|| format!("invalid url '{raw}'")),
        }
    }
}

struct HttpStep {
    settings: HttpSettings,
}

impl StepHandler for HttpStep {
    fn run(&self, _context: &mut Context, _body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        Err(EngineError::UnknownAction {
            action: PLUGIN_NAME.to_string(),
        }
        .into())
    }

    fn resolver(&self) -> Option<&dyn DynamicResolver> {
        Some(self)
    }
}

impl DynamicResolver for HttpStep {
    fn resolve(&self, object: &str, function: &str, _context: &Context, _body: &Value) -> EngineResult<ResolvedOperation> {
        let method = match (object, function) {
            (PLUGIN_NAME, "get") => Method::GET,
            (PLUGIN_NAME, "post") => Method::POST,
            (PLUGIN_NAME, "put") => Method::PUT,
            (PLUGIN_NAME, "patch") => Method::PATCH,
            (PLUGIN_NAME, "delete") => Method::DELETE,
            _ => return Err(unknown_action(PLUGIN_NAME, object, function)),
        };
        let settings = self.settings.clone();
        Ok(ResolvedOperation::new(Operation::Deferred(Box::new(move |body: Value| -> StepFuture {
            Box::pin(send(settings, method, body))
        }))))
    }
}

async fn send(settings: HttpSettings, method: Method, body: Value) -> anyhow::Result<Value> {
    let options = body_map(body)?;
    let raw_url = options.get("url").map(to_text).filter(|url| !url.is_empty()).ok_or_else(|| anyhow!("http requests require a 'url'"))?;
    let url = settings.request_url(&raw_url)?;

    let mut headers = header_map(&settings.headers)?;
    if let Some(Value::Object(extra)) = options.get("headers") {
        headers.extend(header_map(extra)?);
    }

    debug!(method = %method, url = %url, "sending http request");
    let mut builder = reqwest::Client::new().request(method.clone(), url.clone()).headers(headers);
    if let Some(Value::Object(query)) = options.get("query") {
        let pairs: Vec<(String, String)> = query.iter().map(|(key, value)| (key.clone(), to_text(value))).collect();
        builder = builder.query(&pairs);
    }
    if let Some(payload) = options.get("json").filter(|payload| !payload.is_null()) {
        builder = builder.json(payload);
    } else if let Some(payload) = options.get("body").filter(|payload| !payload.is_null()) {
        builder = builder.body(to_text(payload));
    }

    let response = builder.send().await.with_context(|| format!("{method} {url} failed"))?;
    let status = response.status();
    let response_headers: Map<String, Value> = response
        .headers()
        .iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_str().unwrap_or_default().to_string())))
        .collect();
    let text = response.text().await.with_context(|| format!("failed to read response from {url}"))?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    debug!(status = status.as_u16(), "http response received");

    Ok(json!({
        "status": status.as_u16(),
        "headers": response_headers,
        "body": body,
    }))
}

fn header_map(values: &Map<String, Value>) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in values {
        let header_name = HeaderName::from_bytes(name.as_bytes()).with_context(|| format!("invalid header name '{name}'"))?;
        let header_value = HeaderValue::from_str(&to_text(value)).with_context(|| format!("invalid value for header '{name}'"))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
