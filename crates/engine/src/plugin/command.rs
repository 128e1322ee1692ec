//! Plugins backed by an external executable.
//!
//! A document declares one with a `command` entry:
//!
//! ```yaml
//! plugins:
//!   tool:
//!     command: ./bin/tool
//!     args: [--quiet]
//!     env: { TOOL_MODE: scaffold }
//! ```
//!
//! `tool` runs the executable with the rendered body as JSON on stdin.
//! `tool.build` and `tool.assets:build` append `build` or `assets:build` as a
//! final argument. Stdout is parsed as JSON when possible and returned as the
//! step result; a non-zero exit fails the step.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use serde_json::{Map, Value};
use stencil_util::{block_on_future, resolve_against};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{DynamicResolver, Operation, Plugin, PluginRegistry, ResolvedOperation, StepFuture, StepHandler};
use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::template::render_value;
use crate::values::to_text;

#[derive(Debug, Clone)]
pub struct CommandPlugin {
    name: String,
    package_dir: PathBuf,
}

impl CommandPlugin {
    pub fn new(name: &str, package_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            package_dir: package_dir.to_path_buf(),
        }
    }
}

impl Plugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, registry: &mut PluginRegistry, config: &Value) -> EngineResult<()> {
        let spec = CommandSpec::from_config(&self.name, config, &self.package_dir).map_err(EngineError::Other)?;
        debug!(plugin = %self.name, program = %spec.program.display(), "registered command plugin");
        registry.register(self.name.clone(), Arc::new(CommandStep { spec }));
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CommandSpec {
    plugin: String,
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    fn from_config(plugin: &str, config: &Value, package_dir: &Path) -> anyhow::Result<Self> {
        let command = config
            .get("command")
            .and_then(Value::as_str)
            .filter(|command| !command.is_empty())
            .ok_or_else(|| anyhow!("plugin '{plugin}' requires a 'command'"))?;
        // Bare names are looked up on PATH; anything with a separator is package relative.
        let program = if command.contains('/') {
            resolve_against(package_dir, command)
        } else {
            PathBuf::from(command)
        };
        let args = match config.get("args") {
            Some(Value::Array(items)) => items.iter().map(to_text).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => anyhow::bail!("plugin '{plugin}': 'args' must be a list, got {other}"),
        };
        let env = config
            .get("env")
            .and_then(Value::as_object)
            .map(|env| env.iter().map(|(key, value)| (key.clone(), to_text(value))).collect())
            .unwrap_or_default();
        Ok(Self {
            plugin: plugin.to_string(),
            program,
            args,
            env,
        })
    }

    async fn invoke(self, sub_path: Option<String>, working_dir: PathBuf, body: Value) -> anyhow::Result<Value> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(sub_path.iter())
            .envs(self.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if working_dir.is_dir() {
            command.current_dir(&working_dir);
        }

        debug!(plugin = %self.plugin, program = %self.program.display(), sub_path = ?sub_path, "spawning plugin command");
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start {}", self.program.display()))?;
        let input = serde_json::to_vec(&body)?;
        // A command may exit without reading its input; its exit status decides the outcome.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(error) = stdin.write_all(&input).await
            && error.kind() != ErrorKind::BrokenPipe
        {
            return Err(anyhow!(error).context("failed to write plugin input"));
        }
        let output = child.wait_with_output().await.context("plugin command did not finish")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}

struct CommandStep {
    spec: CommandSpec,
}

impl CommandStep {
    fn sub_path(&self, object: &str, function: &str) -> String {
        if object == self.spec.plugin {
            function.to_string()
        } else {
            format!("{object}:{function}")
        }
    }
}

impl StepHandler for CommandStep {
    fn run(&self, context: &mut Context, body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let rendered = match render_value(body, context)? {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let future = self.spec.clone().invoke(None, context.target_dir(), rendered);
        block_on_future(future).map(Some)
    }

    fn resolver(&self) -> Option<&dyn DynamicResolver> {
        Some(self)
    }
}

impl DynamicResolver for CommandStep {
    fn resolve(&self, object: &str, function: &str, context: &Context, _body: &Value) -> EngineResult<ResolvedOperation> {
        let spec = self.spec.clone();
        let sub_path = self.sub_path(object, function);
        let working_dir = context.target_dir();
        Ok(ResolvedOperation::new(Operation::Deferred(Box::new(move |body: Value| -> StepFuture {
            Box::pin(spec.invoke(Some(sub_path), working_dir, body))
        }))))
    }
}
