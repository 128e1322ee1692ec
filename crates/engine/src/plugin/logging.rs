//! `log`, `debug`, `print` and `dump` steps.

use std::sync::Arc;

use serde_json::Value;
use stencil_util::redact_value;
use tracing::{debug, info};

use super::{Plugin, PluginRegistry, StepHandler};
use crate::context::Context;
use crate::error::EngineResult;
use crate::runtime::Runtime;
use crate::template::{render_text, render_value};
use crate::values::to_text;

#[derive(Debug, Default)]
pub struct LogPlugin;

impl Plugin for LogPlugin {
    fn name(&self) -> &str {
        "log"
    }

    fn init(&self, registry: &mut PluginRegistry, _config: &Value) -> EngineResult<()> {
        registry.register("log", Arc::new(LogStep::Info));
        registry.register("debug", Arc::new(LogStep::Debug));
        registry.register("print", Arc::new(LogStep::Print));
        registry.register("dump", Arc::new(DumpStep));
        Ok(())
    }
}

/// Accepts either a plain string or `{message: ...}`.
fn message_template(body: &Value) -> String {
    match body {
        Value::Object(map) => map.get("message").map(to_text).unwrap_or_default(),
        other => to_text(other),
    }
}

enum LogStep {
    Info,
    Debug,
    Print,
}

impl StepHandler for LogStep {
    fn run(&self, context: &mut Context, body: &Value, runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let message = render_text(&message_template(body), context)?;
        match self {
            LogStep::Info => info!(target: "stencil::job", "{message}"),
            LogStep::Debug => debug!(target: "stencil::job", "{message}"),
            LogStep::Print => runtime.write(&format!("{message}\n")),
        }
        Ok(None)
    }
}

/// Prints a value as YAML with sensitive keys redacted. Without a body the
/// whole context is printed.
struct DumpStep;

impl StepHandler for DumpStep {
    fn run(&self, context: &mut Context, body: &Value, runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let (label, value) = match body {
            Value::Null => ("context".to_string(), Value::Object(context.values().clone())),
            Value::Object(map) if map.contains_key("message") => (to_text(&map["message"]), render_value(&map["message"], context)?),
            other => (to_text(other), render_value(other, context)?),
        };
        let rendered = serde_yaml::to_string(&redact_value(&value))?;
        runtime.write(&format!("=== DUMP: {label} ===\n{rendered}"));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptedRuntime;
    use serde_json::json;

    #[test]
    fn print_writes_rendered_message() {
        let mut context = Context::from(json!({"name": "demo"}).as_object().cloned().unwrap());
        let mut runtime = ScriptedRuntime::default();
        LogStep::Print.run(&mut context, &json!({"message": "hi ${{ name }}"}), &mut runtime).unwrap();
        assert_eq!(runtime.output, vec!["hi demo\n"]);
    }

    #[test]
    fn dump_redacts_secrets() {
        let mut context = Context::from(json!({"api_token": "s3cr3t", "name": "demo"}).as_object().cloned().unwrap());
        let mut runtime = ScriptedRuntime::default();
        DumpStep.run(&mut context, &Value::Null, &mut runtime).unwrap();
        let output = runtime.output.join("");
        assert!(output.starts_with("=== DUMP: context ==="));
        assert!(output.contains("name: demo"));
        assert!(!output.contains("s3cr3t"));
    }
}
