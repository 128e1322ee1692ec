//! Step handlers and the per-run plugin registry.
//!
//! Modules:
//! - `core_steps`: context, note, todo, prompt, fetch and nested scaffold steps
//! - `file`: dynamic file operations (`file.write`, `file.read`, ...)
//! - `logging`: logging and printing steps
//! - `http`: asynchronous HTTP requests, enabled by declaring `http`
//! - `command`: external executables declared with a `command` entry
//!
//! A registry is built for every execution from the always-on plugins plus
//! the plugins a job document declares. Registering a name twice replaces
//! the earlier handler.

mod command;
mod core_steps;
mod file;
mod http;
mod logging;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;

pub use command::CommandPlugin;
pub use core_steps::CorePlugin;
pub use file::FilePlugin;
pub use http::HttpPlugin;
pub use logging::LogPlugin;

pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// A callable produced by a [`DynamicResolver`].
pub enum Operation {
    /// Runs on the executor thread with access to the context.
    Immediate(Box<dyn FnOnce(&mut Context, Value) -> anyhow::Result<Option<Value>>>),
    /// Produces a future that is driven to completion before the next step.
    Deferred(Box<dyn FnOnce(Value) -> StepFuture>),
}

impl Operation {
    pub fn is_async(&self) -> bool {
        matches!(self, Operation::Deferred(_))
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_async() { "Operation::Deferred" } else { "Operation::Immediate" })
    }
}

/// Operation plus the top-level body keys that must reach it unrendered.
#[derive(Debug)]
pub struct ResolvedOperation {
    pub operation: Operation,
    pub exclude_keys: Vec<String>,
}

impl ResolvedOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            exclude_keys: Vec::new(),
        }
    }

    pub fn excluding(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// Resolves `plugin.object:function` style actions to operations.
pub trait DynamicResolver: Send + Sync {
    fn resolve(&self, object: &str, function: &str, context: &Context, body: &Value) -> EngineResult<ResolvedOperation>;
}

/// Entry point for a registered step action.
pub trait StepHandler: Send + Sync {
    /// Runs the step. Handlers render their own body. A returned value is
    /// recorded under `steps.<id>` when the step has an id.
    fn run(&self, context: &mut Context, body: &Value, runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>>;

    fn resolver(&self) -> Option<&dyn DynamicResolver> {
        None
    }
}

/// A bundle of handlers registered under one or more action names.
pub trait Plugin {
    fn name(&self) -> &str;

    /// Registers handlers. `config` is the document's entry for the plugin,
    /// or null for always-on plugins.
    fn init(&self, registry: &mut PluginRegistry, config: &Value) -> EngineResult<()>;
}

#[derive(Default, Clone)]
pub struct PluginRegistry {
    handlers: IndexMap<String, Arc<dyn StepHandler>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for one execution: the always-on plugins, then every plugin
    /// declared in `declared`. Relative command paths resolve against
    /// `package_dir`.
    pub fn for_document(declared: &Map<String, Value>, package_dir: &Path) -> EngineResult<Self> {
        let mut registry = Self::new();
        let always_on: [Box<dyn Plugin>; 3] = [Box::new(CorePlugin), Box::new(FilePlugin), Box::new(LogPlugin)];
        for plugin in &always_on {
            registry.install(plugin.as_ref(), &Value::Null)?;
        }
        for (name, config) in declared {
            let plugin = declared_plugin(name, config, package_dir)?;
            registry.install(plugin.as_ref(), config)?;
        }
        Ok(registry)
    }

    pub fn install(&mut self, plugin: &dyn Plugin, config: &Value) -> EngineResult<()> {
        debug!(plugin = %plugin.name(), "initializing plugin");
        plugin.init(self, config)
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            debug!(action = %name, "replacing previously registered step handler");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

fn declared_plugin(name: &str, config: &Value, package_dir: &Path) -> EngineResult<Box<dyn Plugin>> {
    match name {
        "core" => Ok(Box::new(CorePlugin)),
        "file" => Ok(Box::new(FilePlugin)),
        "log" => Ok(Box::new(LogPlugin)),
        "http" => Ok(Box::new(HttpPlugin)),
        _ if config.get("command").is_some_and(Value::is_string) => Ok(Box::new(CommandPlugin::new(name, package_dir))),
        _ => Err(EngineError::UnknownPlugin {
            plugin: name.to_string(),
            action: name.to_string(),
        }),
    }
}

/// Body as a mapping; null becomes an empty mapping.
pub(crate) fn body_map(body: Value) -> anyhow::Result<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => anyhow::bail!("expected a mapping, got {other}"),
    }
}

/// Rejects functions a resolver does not expose.
pub(crate) fn unknown_action(plugin: &str, object: &str, function: &str) -> EngineError {
    let action = if object == plugin {
        format!("{plugin}.{function}")
    } else {
        format!("{plugin}.{object}:{function}")
    };
    EngineError::UnknownAction { action }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str);

    impl StepHandler for Named {
        fn run(&self, _context: &mut Context, _body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
            Ok(Some(json!(self.0)))
        }
    }

    #[test]
    fn builtins_are_always_registered() {
        let registry = PluginRegistry::for_document(&Map::new(), Path::new(".")).unwrap();
        for name in ["set_context", "add_note", "add_todo", "prompt", "fetch", "scaffold", "file", "log", "print", "dump"] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(!registry.contains("http"));
    }

    #[test]
    fn declared_plugins_are_initialized() {
        let declared = json!({"http": {"base_url": "https://example.com"}, "tool": {"command": "./bin/tool"}});
        let registry = PluginRegistry::for_document(declared.as_object().unwrap(), Path::new("/pkg")).unwrap();
        assert!(registry.contains("http"));
        assert!(registry.contains("tool"));
    }

    #[test]
    fn unknown_declared_plugin_fails() {
        let declared = json!({"aws": {}});
        let error = PluginRegistry::for_document(declared.as_object().unwrap(), Path::new(".")).unwrap_err();
        assert!(matches!(error, EngineError::UnknownPlugin { plugin, .. } if plugin == "aws"));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = PluginRegistry::new();
        registry.register("step", Arc::new(Named("first")));
        registry.register("step", Arc::new(Named("second")));
        let mut runtime = crate::runtime::ScriptedRuntime::default();
        let result = registry.get("step").unwrap().run(&mut Context::new(), &Value::Null, &mut runtime).unwrap();
        assert_eq!(result, Some(json!("second")));
        assert_eq!(registry.names().count(), 1);
    }
}
