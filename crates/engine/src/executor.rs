//! Sequential step dispatch.
//!
//! A step is either `{action: body}` or `{action: "name", with: body, id:
//! "x"}`. The action splits at the first `.` or `:` into a plugin name and a
//! sub-path. With a sub-path and a handler that exposes a resolver, the step
//! is dispatched dynamically: the resolver picks an operation and the body
//! is rendered before it runs. Every other step goes to the handler's `run`,
//! which renders its own body.

use serde_json::Value;
use stencil_util::block_on_future;
use tracing::{debug, info_span};

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::plugin::{Operation, PluginRegistry};
use crate::runtime::Runtime;
use crate::template::{self, RenderError};

/// A step split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCall<'a> {
    pub action: &'a str,
    pub body: &'a Value,
    pub id: Option<&'a str>,
}

/// Action identifier split into plugin, object and function names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionName<'a> {
    pub plugin: &'a str,
    /// `(object, function)` when the action carries a sub-path.
    pub target: Option<(&'a str, &'a str)>,
}

impl<'a> ActionName<'a> {
    /// `plugin`, `plugin.function`, `plugin:function` or `plugin.object:function`.
    pub fn parse(action: &'a str) -> Self {
        let Some(split) = action.find(['.', ':']) else {
            return Self { plugin: action, target: None };
        };
        let plugin = &action[..split];
        let sub_path = &action[split + 1..];
        if sub_path.is_empty() {
            return Self { plugin, target: None };
        }
        let target = match sub_path.rsplit_once(':') {
            Some((object, function)) => (object, function),
            None => (plugin, sub_path),
        };
        Self {
            plugin,
            target: Some(target),
        }
    }
}

static NULL_BODY: Value = Value::Null;

pub fn parse_step(index: usize, step: &Value) -> EngineResult<StepCall<'_>> {
    let invalid = |message: &str| EngineError::InvalidStep {
        index,
        message: message.to_string(),
    };
    let map = step.as_object().ok_or_else(|| invalid("a step must be a mapping"))?;

    if let Some(action) = map.get("action") {
        let action = action.as_str().ok_or_else(|| invalid("'action' must be a string"))?;
        let id = match map.get("id") {
            Some(Value::String(id)) => Some(id.as_str()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(invalid("'id' must be a string")),
        };
        return Ok(StepCall {
            action,
            body: map.get("with").unwrap_or(&NULL_BODY),
            id,
        });
    }

    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((action, body)), None) => Ok(StepCall { action, body, id: None }),
        (None, _) => Err(invalid("a step must name an action")),
        (Some(_), Some(_)) => Err(invalid("a step must contain exactly one action")),
    }
}

/// Runs `steps` in order. The first failing step stops the run.
pub fn execute_steps(context: &mut Context, runtime: &mut dyn Runtime, registry: &PluginRegistry, steps: &[Value]) -> EngineResult<()> {
    for (index, step) in steps.iter().enumerate() {
        let call = parse_step(index, step)?;
        let span = info_span!("step", index, action = %call.action);
        let _entered = span.enter();
        let result = execute_step(context, runtime, registry, &call)?;
        if let (Some(id), Some(value)) = (call.id, result) {
            context.record_step(id, value);
        }
    }
    Ok(())
}

fn execute_step(context: &mut Context, runtime: &mut dyn Runtime, registry: &PluginRegistry, call: &StepCall<'_>) -> EngineResult<Option<Value>> {
    let name = ActionName::parse(call.action);
    let handler = registry.get(name.plugin).ok_or_else(|| EngineError::UnknownPlugin {
        plugin: name.plugin.to_string(),
        action: call.action.to_string(),
    })?;

    if let Some((object, function)) = name.target
        && let Some(resolver) = handler.resolver()
    {
        debug!(action = %call.action, object, function, "dynamic dispatch");
        let resolved = resolver.resolve(object, function, context, call.body)?;
        let body = template::render(call.body, context, &resolved.exclude_keys)?;
        let outcome = match resolved.operation {
            Operation::Immediate(operation) => operation(context, body),
            Operation::Deferred(operation) => block_on_future(operation(body)).map(Some),
        };
        return outcome.map_err(|source| step_failure(call.action, source));
    }

    debug!(action = %call.action, "static dispatch");
    handler.run(context, call.body, runtime).map_err(|source| step_failure(call.action, source))
}

/// Engine and render errors raised inside a handler keep their variant;
/// anything else is reported against the action.
fn step_failure(action: &str, source: anyhow::Error) -> EngineError {
    let source = match source.downcast::<EngineError>() {
        Ok(error) => return error,
        Err(source) => source,
    };
    match source.downcast::<RenderError>() {
        Ok(error) => EngineError::from(error),
        Err(source) => EngineError::Step {
            action: action.to_string(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::plugin::{DynamicResolver, ResolvedOperation, StepFuture, StepHandler};
    use crate::runtime::ScriptedRuntime;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl StepHandler for Recorder {
        fn run(&self, _context: &mut Context, body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
            self.calls.lock().expect("calls lock").push(body.as_str().unwrap_or_default().to_string());
            Ok(Some(body.clone()))
        }
    }

    struct Echo;

    impl StepHandler for Echo {
        fn run(&self, _context: &mut Context, _body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
            anyhow::bail!("static entry point should not be used")
        }

        fn resolver(&self) -> Option<&dyn DynamicResolver> {
            Some(self)
        }
    }

    impl DynamicResolver for Echo {
        fn resolve(&self, object: &str, function: &str, _context: &Context, _body: &Value) -> EngineResult<ResolvedOperation> {
            let label = format!("{object}:{function}");
            match function {
                "now" => Ok(ResolvedOperation::new(Operation::Immediate(Box::new(move |_: &mut Context, body: Value| {
                    Ok(Some(json!({"label": label, "body": body})))
                })))
                .excluding(["raw"])),
                "later" => Ok(ResolvedOperation::new(Operation::Deferred(Box::new(move |body: Value| -> StepFuture {
                    Box::pin(async move { Ok(json!({"label": label, "body": body})) })
                })))),
                _ => Err(crate::plugin::unknown_action("echo", object, function)),
            }
        }
    }

    fn registry(calls: &Arc<Mutex<Vec<String>>>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry.register("record", Arc::new(Recorder { calls: Arc::clone(calls) }));
        registry.register("echo", Arc::new(Echo));
        registry
    }

    #[test]
    fn action_names_split_into_plugin_object_and_function() {
        assert_eq!(ActionName::parse("set_context"), ActionName { plugin: "set_context", target: None });
        assert_eq!(
            ActionName::parse("file.write"),
            ActionName {
                plugin: "file",
                target: Some(("file", "write"))
            }
        );
        assert_eq!(
            ActionName::parse("aws:s3:put_object"),
            ActionName {
                plugin: "aws",
                target: Some(("s3", "put_object"))
            }
        );
        assert_eq!(
            ActionName::parse("aws.s3.client:list"),
            ActionName {
                plugin: "aws",
                target: Some(("s3.client", "list"))
            }
        );
    }

    #[test]
    fn steps_run_in_document_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls);
        let steps = vec![json!({"record": "A"}), json!({"record": "B"}), json!({"record": "C"})];
        execute_steps(&mut Context::new(), &mut ScriptedRuntime::default(), &registry, &steps).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn unknown_action_stops_later_steps() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls);
        let steps = vec![json!({"record": "A"}), json!({"echo.missing": {}}), json!({"record": "C"})];
        let error = execute_steps(&mut Context::new(), &mut ScriptedRuntime::default(), &registry, &steps).unwrap_err();
        assert!(matches!(error, EngineError::UnknownAction { action } if action == "echo.missing"));
        assert_eq!(*calls.lock().unwrap(), vec!["A"]);
    }

    #[test]
    fn unknown_plugin_is_reported() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let error = execute_steps(&mut Context::new(), &mut ScriptedRuntime::default(), &registry(&calls), &[json!({"nope": {}})]).unwrap_err();
        assert!(matches!(error, EngineError::UnknownPlugin { plugin, .. } if plugin == "nope"));
    }

    #[test]
    fn dynamic_operations_receive_rendered_bodies() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls);
        let mut context = Context::from(json!({"name": "api"}).as_object().cloned().unwrap());
        let steps = vec![
            json!({"action": "echo.tools:now", "id": "first", "with": {"value": "${{ name }}", "raw": "${{ name }}"}}),
            json!({"action": "echo.later", "id": "second", "with": "${{ name }}"}),
        ];
        execute_steps(&mut context, &mut ScriptedRuntime::default(), &registry, &steps).unwrap();
        let recorded = &context.get("steps").unwrap();
        assert_eq!(recorded["first"], json!({"label": "tools:now", "body": {"value": "api", "raw": "${{ name }}"}}));
        assert_eq!(recorded["second"], json!({"label": "echo:later", "body": "api"}));
    }

    #[test]
    fn malformed_steps_are_rejected() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![json!({"record": "A", "other": "B"})];
        let error = execute_steps(&mut Context::new(), &mut ScriptedRuntime::default(), &registry(&calls), &steps).unwrap_err();
        assert!(matches!(error, EngineError::InvalidStep { index: 0, .. }));
    }
}
