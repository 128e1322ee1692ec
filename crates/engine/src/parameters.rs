//! Parameter resolution: context-supplied values, overrides, `if` gates and
//! prompts, followed by conversion to the declared type.

use regex::Regex;
use serde_json::{Map, Value, json};
use stencil_types::{ParameterSpec, ParameterType, PromptSpec};
use stencil_util::{GitUrl, deep_merge};
use tracing::debug;
use url::Url;

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::template;
use crate::values::{is_truthy, to_text};

const TRUE_STRINGS: [&str; 5] = ["yes", "true", "t", "1", "y"];

/// Resolves `specs` in order, writing each value into `context`.
pub fn process_parameters(specs: &[Value], context: &mut Context, runtime: &mut dyn Runtime) -> EngineResult<()> {
    for raw in specs {
        let spec = apply_overrides(raw, runtime)?;
        let (target, value) = resolve_parameter(spec, context, runtime)?;
        context.insert(target, value);
    }
    Ok(())
}

fn apply_overrides(raw: &Value, runtime: &dyn Runtime) -> EngineResult<Value> {
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Other(anyhow::anyhow!("parameter spec {raw} has no name")))?;
    let mut merged = raw.clone();
    if let Some(rule) = runtime.parameter_overrides().iter().find(|rule| rule.applies_to(name)) {
        debug!(parameter = %name, "applying parameter override");
        deep_merge(&mut merged, &Value::Object(rule.overrides.clone()));
    }
    Ok(merged)
}

/// Returns the target key and its value.
fn resolve_parameter(raw: Value, context: &Context, runtime: &mut dyn Runtime) -> EngineResult<(String, Value)> {
    let spec = parse_spec(raw.clone())?;
    let parameter_type = spec.prompt.value_type();

    if let Some(existing) = context.get(spec.source_key()) {
        debug!(parameter = %spec.name(), source = %spec.source_key(), "parameter supplied by context");
        return Ok((spec.target_key().to_string(), convert(existing, parameter_type)?));
    }

    let rendered = template::render(&raw, context, &["validate".to_string()])?;
    // A gate that renders to null still counts as present and closed.
    let gated_off = rendered.get("if").is_some_and(|condition| !is_truthy(condition));
    let spec = parse_spec(rendered)?;
    let target = spec.target_key().to_string();

    if gated_off {
        debug!(parameter = %spec.name(), "parameter gated off, using default");
        let default = spec.prompt.default.clone().unwrap_or(Value::Null);
        return Ok((target, convert(&default, parameter_type)?));
    }

    let answer = runtime.ask(&spec.prompt)?;
    Ok((target, convert(&answer, parameter_type)?))
}

fn parse_spec(raw: Value) -> EngineResult<ParameterSpec> {
    serde_json::from_value(raw).map_err(|error| EngineError::Other(anyhow::anyhow!("invalid parameter spec: {error}")))
}

/// Recognized spellings of true; everything else is false.
pub fn str2bool(text: &str) -> bool {
    TRUE_STRINGS.contains(&text.trim().to_ascii_lowercase().as_str())
}

/// Converts `value` to `parameter_type`. Null stays null.
pub fn convert(value: &Value, parameter_type: ParameterType) -> EngineResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let failed = || EngineError::conversion(value, parameter_type.as_str());
    Ok(match parameter_type {
        ParameterType::Int => match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
                .map(Value::from)
                .ok_or_else(failed)?,
            Value::String(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().map(|float| float.trunc() as i64))
                    .map(Value::from)
                    .ok_or_else(failed)?
            }
            Value::Bool(flag) => Value::from(i64::from(*flag)),
            _ => return Err(failed()),
        },
        ParameterType::Float => match value {
            Value::Number(number) => number.as_f64().map(crate::values::float_value).ok_or_else(failed)?,
            Value::String(text) => text.trim().parse::<f64>().map(crate::values::float_value).map_err(|_| failed())?,
            _ => return Err(failed()),
        },
        ParameterType::Bool | ParameterType::Confirm => Value::Bool(match value {
            Value::Bool(flag) => *flag,
            Value::String(text) => str2bool(text),
            other => is_truthy(other),
        }),
        ParameterType::Str => match value {
            Value::String(_) => value.clone(),
            other => Value::String(to_text(other)),
        },
        ParameterType::Checklist => match value {
            Value::Array(_) => value.clone(),
            Value::String(text) => Value::Array(
                text.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(Value::from)
                    .collect(),
            ),
            other => Value::Array(vec![other.clone()]),
        },
        ParameterType::Url => match value {
            Value::Object(_) => value.clone(),
            Value::String(text) => url_parts(text).ok_or_else(failed)?,
            _ => return Err(failed()),
        },
        ParameterType::GitUrl => match value {
            Value::Object(_) => value.clone(),
            Value::String(text) => GitUrl::parse(text).map_err(|_| failed())?.to_value(),
            _ => return Err(failed()),
        },
    })
}

fn url_parts(text: &str) -> Option<Value> {
    let url = Url::parse(text.trim()).ok()?;
    let host = url.host_str().unwrap_or_default().to_string();
    let netloc = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.clone(),
    };
    Some(json!({
        "scheme": url.scheme(),
        "host": host,
        "port": url.port_or_known_default(),
        "path": url.path(),
        "query": url.query().unwrap_or_default(),
        "fragment": url.fragment().unwrap_or_default(),
        "netloc": netloc,
        "url": url.as_str(),
    }))
}

/// Checks an answer against the prompt's validation pattern.
pub fn validate_answer(spec: &PromptSpec, answer: &Value) -> EngineResult<()> {
    let Some(pattern) = spec.validate.as_deref().filter(|pattern| !pattern.is_empty()) else {
        return Ok(());
    };
    let regex = Regex::new(pattern).map_err(|error| EngineError::Other(anyhow::anyhow!("invalid validation pattern {pattern}: {error}")))?;
    // Anchored at the start only, like a prefix match.
    if regex.find(&to_text(answer)).is_some_and(|found| found.start() == 0) {
        Ok(())
    } else {
        Err(EngineError::ParameterValidation {
            parameter: spec.name.clone(),
            pattern: pattern.to_string(),
        })
    }
}

/// Prompt spec from a `prompt` step body or parameter mapping.
pub(crate) fn prompt_spec(body: Map<String, Value>) -> EngineResult<PromptSpec> {
    serde_json::from_value(Value::Object(body)).map_err(|error| EngineError::Other(anyhow::anyhow!("invalid prompt: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptedRuntime;
    use stencil_types::ParameterOverride;

    fn context(values: Value) -> Context {
        Context::from(values.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn context_supplied_values_never_prompt() {
        let mut ctx = context(json!({"port": "8080"}));
        let mut runtime = ScriptedRuntime::default();
        process_parameters(&[json!({"name": "port", "type": "int"})], &mut ctx, &mut runtime).unwrap();
        assert_eq!(ctx.get("port"), Some(&json!(8080)));
        assert!(runtime.asked.is_empty());
    }

    #[test]
    fn context_source_and_target_route_values() {
        let mut ctx = context(json!({"user": "ann"}));
        let mut runtime = ScriptedRuntime::default();
        let spec = json!({"name": "owner", "context_source": "user", "context_target": "maintainer"});
        process_parameters(&[spec], &mut ctx, &mut runtime).unwrap();
        assert_eq!(ctx.get("maintainer"), Some(&json!("ann")));
        assert!(runtime.asked.is_empty());
    }

    #[test]
    fn overrides_seed_the_prompt_default() {
        let mut ctx = Context::new();
        let mut runtime = ScriptedRuntime::default().with_overrides(vec![ParameterOverride {
            names: vec!["p".into()],
            overrides: json!({"default": 5}).as_object().cloned().unwrap(),
        }]);
        process_parameters(&[json!({"name": "p", "type": "int", "default": 1})], &mut ctx, &mut runtime).unwrap();
        assert_eq!(runtime.asked[0].default, Some(json!(5)));
        assert_eq!(ctx.get("p"), Some(&json!(5)));
    }

    #[test]
    fn false_gate_writes_default_without_asking() {
        let mut ctx = context(json!({"advanced": false}));
        let mut runtime = ScriptedRuntime::default();
        let spec = json!({"name": "replicas", "type": "int", "default": "2", "if": "${{ advanced }}"});
        process_parameters(&[spec], &mut ctx, &mut runtime).unwrap();
        assert_eq!(ctx.get("replicas"), Some(&json!(2)));
        assert!(runtime.asked.is_empty());
    }

    #[test]
    fn undefined_gate_counts_as_closed() {
        let mut ctx = Context::new();
        let mut runtime = ScriptedRuntime::new([json!("asked")]);
        let spec = json!({"name": "db_name", "default": "app", "if": "${{ use_db }}"});
        process_parameters(&[spec], &mut ctx, &mut runtime).unwrap();
        assert!(runtime.asked.is_empty());
        assert_eq!(ctx.get("db_name"), Some(&json!("app")));

        let mut runtime = ScriptedRuntime::new([json!("asked")]);
        process_parameters(&[json!({"name": "cache", "default": "on", "if": null})], &mut ctx, &mut runtime).unwrap();
        assert!(runtime.asked.is_empty());
        assert_eq!(ctx.get("cache"), Some(&json!("on")));
    }

    #[test]
    fn only_the_first_matching_override_applies() {
        let mut ctx = Context::new();
        let mut runtime = ScriptedRuntime::default().with_overrides(vec![
            ParameterOverride {
                names: vec!["region".into()],
                overrides: json!({"default": "eu"}).as_object().cloned().unwrap(),
            },
            ParameterOverride {
                names: vec!["region".into()],
                overrides: json!({"default": "us", "description": "Where"}).as_object().cloned().unwrap(),
            },
        ]);
        process_parameters(&[json!({"name": "region"})], &mut ctx, &mut runtime).unwrap();
        assert_eq!(runtime.asked[0].default, Some(json!("eu")));
        assert_eq!(runtime.asked[0].description, None);
    }

    #[test]
    fn prompt_metadata_is_rendered_before_asking() {
        let mut ctx = context(json!({"project": "api"}));
        let mut runtime = ScriptedRuntime::new([json!("yes")]);
        let spec = json!({"name": "deploy", "type": "confirm", "description": "Deploy ${{ project }}?", "validate": "^${{"});
        process_parameters(&[spec], &mut ctx, &mut runtime).unwrap();
        assert_eq!(runtime.asked[0].description, Some(json!("Deploy api?")));
        assert_eq!(runtime.asked[0].validate.as_deref(), Some("^${{"));
        assert_eq!(ctx.get("deploy"), Some(&json!(true)));
    }

    #[test]
    fn interrupt_propagates() {
        let mut runtime = ScriptedRuntime::default();
        let error = process_parameters(&[json!({"name": "x"})], &mut Context::new(), &mut runtime).unwrap_err();
        assert!(error.is_interrupted());
    }

    #[test]
    fn conversions() {
        assert_eq!(convert(&json!("42"), ParameterType::Int).unwrap(), json!(42));
        assert_eq!(convert(&json!(3.9), ParameterType::Int).unwrap(), json!(3));
        assert_eq!(convert(&json!("Y"), ParameterType::Bool).unwrap(), json!(true));
        assert_eq!(convert(&json!("no"), ParameterType::Bool).unwrap(), json!(false));
        assert_eq!(convert(&json!(7), ParameterType::Str).unwrap(), json!("7"));
        assert_eq!(convert(&json!("1.5"), ParameterType::Float).unwrap(), json!(1.5));
        assert_eq!(convert(&json!("a, b,"), ParameterType::Checklist).unwrap(), json!(["a", "b"]));
        assert_eq!(convert(&Value::Null, ParameterType::Int).unwrap(), Value::Null);
        assert!(matches!(convert(&json!("x"), ParameterType::Int), Err(EngineError::Conversion { .. })));
    }

    #[test]
    fn url_conversions_decompose() {
        let url = convert(&json!("https://example.com:8443/a?b=1#c"), ParameterType::Url).unwrap();
        assert_eq!(url["host"], "example.com");
        assert_eq!(url["port"], 8443);
        assert_eq!(url["netloc"], "example.com:8443");
        assert_eq!(url["query"], "b=1");

        let git = convert(&json!("git@github.com:acme/app.git"), ParameterType::GitUrl).unwrap();
        assert_eq!(git["owner"], "acme");
        assert_eq!(git["repo"], "app");
        assert!(convert(&json!("not a url"), ParameterType::Url).is_err());
    }

    #[test]
    fn validation_patterns() {
        let spec = PromptSpec {
            name: "slug".into(),
            validate: Some("^[a-z-]+$".into()),
            ..PromptSpec::default()
        };
        assert!(validate_answer(&spec, &json!("my-app")).is_ok());
        assert!(matches!(
            validate_answer(&spec, &json!("My App")),
            Err(EngineError::ParameterValidation { parameter, .. }) if parameter == "slug"
        ));
    }

    #[test]
    fn validation_matches_from_the_start() {
        let spec = PromptSpec {
            name: "team".into(),
            validate: Some("[a-z]+".into()),
            ..PromptSpec::default()
        };
        assert!(validate_answer(&spec, &json!("abc-X")).is_ok());
        assert!(validate_answer(&spec, &json!("X-abc")).is_err());
    }
}
