//! `file.write`, `file.read`, `file.append`, `file.mkdir` and `file.delete`.
//!
//! Paths resolve against `__target`. A body with `raw: true` keeps its
//! `content` unrendered.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use serde_json::{Map, Value};
use stencil_util::parse_structured;
use tracing::debug;

use super::{DynamicResolver, Operation, Plugin, PluginRegistry, ResolvedOperation, StepHandler, body_map, unknown_action};
use crate::context::Context;
use crate::error::EngineResult;
use crate::runtime::Runtime;
use crate::template::render;
use crate::values::{is_truthy, to_text};

const PLUGIN_NAME: &str = "file";
const CONTENT_KEY: &str = "content";

#[derive(Debug, Default)]
pub struct FilePlugin;

impl Plugin for FilePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn init(&self, registry: &mut PluginRegistry, _config: &Value) -> EngineResult<()> {
        registry.register(PLUGIN_NAME, Arc::new(FileStep));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFunction {
    Write,
    Append,
    Read,
    Mkdir,
    Delete,
}

impl FileFunction {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "write" => Self::Write,
            "append" => Self::Append,
            "read" => Self::Read,
            "mkdir" => Self::Mkdir,
            "delete" => Self::Delete,
            _ => return None,
        })
    }

    fn apply(self, context: &Context, body: Value) -> anyhow::Result<Option<Value>> {
        let options = body_map(body)?;
        let path = target_path(context, &options)?;
        match self {
            Self::Write | Self::Append => {
                let content = options.get(CONTENT_KEY).map(to_text).unwrap_or_default();
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(self == Self::Append)
                    .truncate(self == Self::Write)
                    .open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                file.write_all(content.as_bytes())
                    .with_context(|| format!("failed to write {}", path.display()))?;
                debug!(path = %path.display(), bytes = content.len(), "file written");
                Ok(Some(Value::String(path.to_string_lossy().into_owned())))
            }
            Self::Read => {
                let content = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
                if options.get("parse").is_some_and(is_truthy) {
                    return Ok(Some(parse_structured(&content, &path)?));
                }
                Ok(Some(Value::String(content)))
            }
            Self::Mkdir => {
                fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
                Ok(Some(Value::String(path.to_string_lossy().into_owned())))
            }
            Self::Delete => {
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path).map(|_| true)
                } else if path.exists() {
                    fs::remove_file(&path).map(|_| true)
                } else {
                    Ok(false)
                };
                let removed = removed.with_context(|| format!("failed to delete {}", path.display()))?;
                Ok(Some(Value::Bool(removed)))
            }
        }
    }
}

fn target_path(context: &Context, options: &Map<String, Value>) -> anyhow::Result<PathBuf> {
    let path = options
        .get("path")
        .filter(|path| !path.is_null())
        .map(to_text)
        .context("file operations require a 'path'")?;
    Ok(context.resolve_target_path(&path))
}

fn wants_raw(body: &Value) -> bool {
    body.get("raw").is_some_and(is_truthy)
}

struct FileStep;

impl StepHandler for FileStep {
    /// Without a function name the step writes a file.
    fn run(&self, context: &mut Context, body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let exclude = if wants_raw(body) { vec![CONTENT_KEY.to_string()] } else { Vec::new() };
        let rendered = render(body, context, &exclude)?;
        FileFunction::Write.apply(context, rendered)
    }

    fn resolver(&self) -> Option<&dyn DynamicResolver> {
        Some(self)
    }
}

impl DynamicResolver for FileStep {
    fn resolve(&self, object: &str, function: &str, _context: &Context, body: &Value) -> EngineResult<ResolvedOperation> {
        let operation = match (object, FileFunction::parse(function)) {
            (PLUGIN_NAME, Some(operation)) => operation,
            _ => return Err(unknown_action(PLUGIN_NAME, object, function)),
        };
        let resolved = ResolvedOperation::new(Operation::Immediate(Box::new(move |context: &mut Context, body: Value| {
            operation.apply(context, body)
        })));
        Ok(if wants_raw(body) { resolved.excluding([CONTENT_KEY]) } else { resolved })
    }
}
