//! `${{ }}` templating over context values.
//!
//! Strings without line breaks render in native mode: a string that is a
//! single expression yields the typed result. Everything else renders to
//! text. Mappings and sequences are rendered element by element.

mod eval;
mod filters;
mod lexer;
mod parameter_store;
mod parser;
mod utilities;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use stencil_util::StructuredFileError;
use thiserror::Error;

use crate::context::Context;
use eval::Evaluator;
pub use lexer::{EXPRESSION_END, EXPRESSION_START};
pub use parameter_store::{PARAMETER_STORE_ENV, ParameterStore, ParameterStoreError, active_store};
use parser::{Template, parse_template};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template syntax error in '{template}': {message}")]
    Syntax { template: String, message: String },

    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("unknown test '{0}'")]
    UnknownTest(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{0}")]
    Evaluation(String),

    #[error(transparent)]
    Utility(#[from] UtilityError),
}

impl RenderError {
    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }
}

/// Failures raised by the `utils` helpers.
#[derive(Debug, Error)]
pub enum UtilityError {
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch { url: String, expected: String, actual: String },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] StructuredFileError),
}

/// Renders a value tree. Keys in `exclude_keys` are copied unrendered when
/// `value` is a mapping; nested mappings are always rendered in full.
pub fn render(value: &Value, context: &Context, exclude_keys: &[String]) -> Result<Value, RenderError> {
    match value {
        Value::Object(map) if !exclude_keys.is_empty() => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, entry) in map {
                let entry = if exclude_keys.iter().any(|excluded| excluded == key) {
                    entry.clone()
                } else {
                    render_value(entry, context)?
                };
                rendered.insert(key.clone(), entry);
            }
            Ok(Value::Object(rendered))
        }
        other => render_value(other, context),
    }
}

pub fn render_value(value: &Value, context: &Context) -> Result<Value, RenderError> {
    Ok(match value {
        Value::String(text) => render_str(text, context)?,
        Value::Array(items) => Value::Array(items.iter().map(|item| render_value(item, context)).collect::<Result<_, _>>()?),
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, entry) in map {
                rendered.insert(key.clone(), render_value(entry, context)?);
            }
            Value::Object(rendered)
        }
        scalar => scalar.clone(),
    })
}

/// Native-mode rendering of a single string.
pub fn render_str(text: &str, context: &Context) -> Result<Value, RenderError> {
    if text.contains('\n') {
        return render_text(text, context).map(Value::String);
    }
    let template = parse(text)?;
    if template.is_static() {
        return Ok(Value::String(text.to_string()));
    }
    let mut evaluator = Evaluator::new(context);
    if let Some(expression) = template.single_expression() {
        return evaluator.evaluate(expression);
    }
    let mut output = String::with_capacity(text.len());
    evaluator.render(&template.nodes, &mut output)?;
    Ok(Value::String(output))
}

/// Text-mode rendering; the result is always a string.
pub fn render_text(text: &str, context: &Context) -> Result<String, RenderError> {
    let template = parse(text)?;
    if template.is_static() {
        return Ok(text.to_string());
    }
    let mut output = String::with_capacity(text.len());
    Evaluator::new(context).render(&template.nodes, &mut output)?;
    Ok(output)
}

pub fn render_file(path: &Path, context: &Context) -> Result<String, RenderError> {
    let source = std::fs::read_to_string(path).map_err(|source| UtilityError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    render_text(&source, context)
}

/// Literal replacement of each token key with its value.
pub fn render_tokens(content: &str, tokens: &Map<String, Value>) -> String {
    tokens.iter().fold(content.to_string(), |rendered, (token, value)| {
        rendered.replace(token.as_str(), &crate::values::to_text(value))
    })
}

fn parse(text: &str) -> Result<Template, RenderError> {
    parse_template(text).map_err(|message| RenderError::Syntax {
        template: text.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(values: Value) -> Context {
        match values {
            Value::Object(map) => Context::from(map),
            _ => Context::new(),
        }
    }

    #[test]
    fn single_expression_keeps_native_type() {
        let ctx = context(json!({"count": 3, "flags": {"debug": true}}));
        assert_eq!(render_str("${{ context.count }}", &ctx).unwrap(), json!(3));
        assert_eq!(render_str("${{ flags }}", &ctx).unwrap(), json!({"debug": true}));
        assert_eq!(render_str("${{ context.count }}!", &ctx).unwrap(), json!("3!"));
    }

    #[test]
    fn multiline_strings_render_as_text() {
        let ctx = context(json!({"x": 1}));
        assert_eq!(render_str("a\n${{ context.x }}", &ctx).unwrap(), json!("a\n1"));
        assert_eq!(render_text("${{ x }}\n", &ctx).unwrap(), "1\n");
    }

    #[test]
    fn static_values_are_unchanged() {
        let ctx = context(json!({"x": 1}));
        let value = json!({"a": ["plain", 2, null, true], "b": "no templates {here}"});
        assert_eq!(render(&value, &ctx, &[]).unwrap(), value);
    }

    #[test]
    fn rendering_is_idempotent_on_rendered_output() {
        let ctx = context(json!({"name": "api", "items": ["a", "b"]}));
        let value = json!({"title": "${{ name | upper }}", "list": "${{ items }}"});
        let once = render(&value, &ctx, &[]).unwrap();
        assert_eq!(render(&once, &ctx, &[]).unwrap(), once);
    }

    #[test]
    fn rendering_distributes_over_containers() {
        let ctx = context(json!({"name": "api"}));
        let rendered = render(&json!(["${{ name }}", {"k": "${{ name }}-svc"}]), &ctx, &[]).unwrap();
        assert_eq!(rendered, json!(["api", {"k": "api-svc"}]));
    }

    #[test]
    fn excluded_keys_apply_to_top_level_only() {
        let ctx = context(json!({"x": 1}));
        let body = json!({"content": "${{ x }}", "path": "${{ x }}", "nested": {"content": "${{ x }}"}});
        let rendered = render(&body, &ctx, &["content".to_string()]).unwrap();
        assert_eq!(rendered, json!({"content": "${{ x }}", "path": 1, "nested": {"content": 1}}));
    }

    #[test]
    fn statements_and_loops() {
        let ctx = context(json!({"services": ["web", "worker"], "debug": false}));
        let text = "{% for s in services %}${{ loop.index }}:${{ s }}{% if not loop.last %},{% endif %}{% endfor %}\n\
                    {%- if debug %} on{% else %} off{% endif %}";
        assert_eq!(render_text(text, &ctx).unwrap(), "1:web,2:worker off");
    }

    #[test]
    fn division_rounds_toward_negative_infinity() {
        let ctx = Context::new();
        assert_eq!(render_str("${{ 7 // -2 }}", &ctx).unwrap(), json!(-4));
        assert_eq!(render_str("${{ 7 % -2 }}", &ctx).unwrap(), json!(-1));
        assert_eq!(render_str("${{ 7.5 % -2 }}", &ctx).unwrap(), json!(-0.5));
        assert_eq!(render_str("${{ not missing }}", &ctx).unwrap(), json!(true));
        assert_eq!(render_str("${{ 'a' if missing else 'b' }}", &ctx).unwrap(), json!("b"));
    }

    #[test]
    fn oversized_values_fail_instead_of_panicking() {
        let ctx = context(json!({"lowest": i64::MIN}));
        assert_eq!(render_str("${{ -lowest }}", &ctx).unwrap(), json!(9223372036854775808.0));
        assert_eq!(render_str("${{ 'ab' * 3 }}", &ctx).unwrap(), json!("ababab"));
        assert_eq!(render_str("${{ 'ab' * -1 }}", &ctx).unwrap(), json!(""));
        assert!(render_str("${{ 'ab' * 9223372036854775807 }}", &ctx).is_err());
    }

    #[test]
    fn missing_names_render_empty() {
        let ctx = Context::new();
        assert_eq!(render_str("[${{ context.missing.deeper }}]", &ctx).unwrap(), json!("[]"));
        assert_eq!(render_str("${{ nothing }}", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn syntax_errors_name_the_template() {
        let error = render_str("${{ 1 + }}", &Context::new()).unwrap_err();
        assert!(matches!(error, RenderError::Syntax { template, .. } if template == "${{ 1 + }}"));
    }

    #[test]
    fn tokens_replace_literally() {
        let tokens = json!({"__NAME__": "demo", "0.0.0": "1.2.3"});
        let Value::Object(tokens) = tokens else { unreachable!() };
        assert_eq!(render_tokens("__NAME__ v0.0.0", &tokens), "demo v1.2.3");
    }
}
