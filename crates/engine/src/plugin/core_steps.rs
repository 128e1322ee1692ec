//! Steps every job can use: `set_context`, `add_note`, `add_todo`,
//! `prompt`, `fetch` and `scaffold`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use glob::Pattern;
use serde_json::{Map, Value};
use stencil_types::RunOptions;
use stencil_util::merge_maps;
use tracing::debug;
use walkdir::WalkDir;

use super::{Plugin, PluginRegistry, StepHandler, body_map};
use crate::context::{Context, PACKAGE_KEY};
use crate::error::EngineResult;
use crate::loader;
use crate::parameters::{convert, prompt_spec};
use crate::runtime::Runtime;
use crate::scaffold::execute_scaffold;
use crate::template::{render_text, render_tokens, render_value};
use crate::values::to_text;

#[derive(Debug, Default)]
pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        "core"
    }

    fn init(&self, registry: &mut PluginRegistry, _config: &Value) -> EngineResult<()> {
        registry.register("set_context", Arc::new(SetContextStep));
        registry.register("add_note", Arc::new(MessageStep::Note));
        registry.register("add_todo", Arc::new(MessageStep::Todo));
        registry.register("prompt", Arc::new(PromptStep));
        registry.register("fetch", Arc::new(FetchStep));
        registry.register("scaffold", Arc::new(ScaffoldStep));
        Ok(())
    }
}

/// Writes each entry into the context. Mapping values merge into existing
/// mappings instead of replacing them.
struct SetContextStep;

impl StepHandler for SetContextStep {
    fn run(&self, context: &mut Context, body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let entries = body_map(body.clone()).context("set_context expects a mapping")?;
        for (key, raw) in entries {
            let value = render_value(&raw, context)?;
            let merged = match (context.get_mut(&key), &value) {
                (Some(Value::Object(existing)), Value::Object(update)) => {
                    merge_maps(existing, update);
                    true
                }
                _ => false,
            };
            if !merged {
                context.insert(key, value);
            }
        }
        Ok(None)
    }
}

enum MessageStep {
    Note,
    Todo,
}

impl StepHandler for MessageStep {
    fn run(&self, context: &mut Context, body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let template = match body {
            Value::Object(map) => map.get("message").map(to_text).unwrap_or_default(),
            other => to_text(other),
        };
        let message = render_text(&template, context)?;
        match self {
            MessageStep::Note => context.add_note(message),
            MessageStep::Todo => context.add_todo(message),
        }
        Ok(None)
    }
}

/// Asks a single question and stores the typed answer under its name.
struct PromptStep;

impl StepHandler for PromptStep {
    fn run(&self, context: &mut Context, body: &Value, runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let rendered = render_value(body, context)?;
        let spec = prompt_spec(body_map(rendered)?)?;
        let answer = runtime.ask(&spec)?;
        let value = convert(&answer, spec.value_type())?;
        if !spec.name.is_empty() {
            context.insert(spec.name.clone(), value.clone());
        }
        Ok(Some(value))
    }
}

/// Copies package files into the target directory, rendering contents and
/// file names on the way.
struct FetchStep;

struct FetchOptions {
    source: PathBuf,
    target: PathBuf,
    exclude: Vec<Pattern>,
    raw: Vec<Pattern>,
    tokens: Map<String, Value>,
    skipped: Vec<String>,
}

impl FetchOptions {
    fn from_body(context: &Context, body: Map<String, Value>) -> anyhow::Result<Self> {
        let text = |key: &str| body.get(key).filter(|value| !value.is_null()).map(to_text);
        let patterns = |key: &str| -> anyhow::Result<Vec<Pattern>> {
            let values = match body.get(key) {
                Some(Value::Array(items)) => items.iter().map(to_text).collect(),
                Some(Value::String(single)) => vec![single.clone()],
                _ => Vec::new(),
            };
            values
                .iter()
                .map(|pattern| Pattern::new(pattern).with_context(|| format!("invalid {key} pattern '{pattern}'")))
                .collect()
        };
        let script = context
            .get(PACKAGE_KEY)
            .and_then(|package| package.pointer("/options/script"))
            .and_then(Value::as_str)
            .unwrap_or(stencil_types::DEFAULT_SCRIPT_NAME);

        Ok(Self {
            source: context.resolve_package_path(&text("source").unwrap_or_else(|| ".".into())),
            target: context.resolve_target_path(&text("target").unwrap_or_else(|| ".".into())),
            exclude: patterns("exclude")?,
            raw: patterns("raw")?,
            tokens: body.get("tokens").and_then(Value::as_object).cloned().unwrap_or_default(),
            skipped: loader::candidate_names(script),
        })
    }

    fn is_skipped(&self, relative: &str) -> bool {
        relative.split('/').any(|segment| segment == ".git")
            || self.skipped.iter().any(|name| name == relative)
            || self.exclude.iter().any(|pattern| pattern.matches(relative))
    }
}

impl StepHandler for FetchStep {
    fn run(&self, context: &mut Context, body: &Value, _runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let rendered = body_map(render_value(body, context)?)?;
        let options = FetchOptions::from_body(context, rendered)?;
        debug!(source = %options.source.display(), target = %options.target.display(), "fetching package files");

        if options.source.is_file() {
            let name = options.source.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
            let written = copy_file(context, &options, &options.source, &name)?;
            return Ok(Some(Value::Array(vec![Value::String(written)])));
        }

        let mut written = Vec::new();
        let walker = WalkDir::new(&options.source)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");
        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", options.source.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_name(entry.path(), &options.source);
            if options.is_skipped(&relative) {
                debug!(file = %relative, "skipping");
                continue;
            }
            written.push(Value::String(copy_file(context, &options, entry.path(), &relative)?));
        }
        Ok(Some(Value::Array(written)))
    }
}

fn relative_name(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Copies one file and returns its rendered relative name.
fn copy_file(context: &Context, options: &FetchOptions, source: &Path, relative: &str) -> anyhow::Result<String> {
    let name = render_tokens(&render_text(relative, context)?, &options.tokens);
    let destination = options.target.join(&name);
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let bytes = fs::read(source).with_context(|| format!("failed to read {}", source.display()))?;
    let raw = options.raw.iter().any(|pattern| pattern.matches(relative));
    let content = match String::from_utf8(bytes) {
        Ok(text) if !raw => {
            let rendered = render_text(&text, context).with_context(|| format!("failed to render {relative}"))?;
            render_tokens(&rendered, &options.tokens).into_bytes()
        }
        Ok(text) => text.into_bytes(),
        Err(binary) => binary.into_bytes(),
    };
    fs::write(&destination, content).with_context(|| format!("failed to write {}", destination.display()))?;
    debug!(file = %name, "written");
    Ok(name)
}

/// Runs another package's job in a child context that shares the target.
struct ScaffoldStep;

impl StepHandler for ScaffoldStep {
    fn run(&self, context: &mut Context, body: &Value, runtime: &mut dyn Runtime) -> anyhow::Result<Option<Value>> {
        let mut options = body_map(render_value(body, context)?)?;
        let package = options
            .remove("package")
            .map(|value| to_text(&value))
            .filter(|package| !package.is_empty())
            .ok_or_else(|| anyhow!("scaffold requires a package"))?;

        let local = context.resolve_package_path(&package);
        let child_options = RunOptions {
            package: if local.exists() { local.to_string_lossy().into_owned() } else { package },
            job: options.remove("job").filter(|job| !job.is_null()).map(|job| to_text(&job)),
            script: options.remove("script").filter(|script| !script.is_null()).map(|script| to_text(&script)),
            steps: None,
            context: Map::new(),
            cache_dir: context
                .get(PACKAGE_KEY)
                .and_then(|package| package.pointer("/options/cache_dir"))
                .and_then(Value::as_str)
                .map(PathBuf::from),
        };

        let seed = options.remove("context").and_then(|seed| seed.as_object().cloned()).unwrap_or_default();
        let mut child = Context::from(seed);
        child.set_target(&context.target_dir());

        debug!(package = %child_options.package, job = %child_options.job_name(), "running nested job");
        execute_scaffold(&mut child, &child_options, runtime)?;

        for note in child.notes() {
            context.add_note(render_text(note, &child)?);
        }
        for todo in child.todos() {
            context.add_todo(render_text(todo, &child)?);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptedRuntime;
    use serde_json::json;

    fn run(handler: &dyn StepHandler, context: &mut Context, body: Value) -> Option<Value> {
        handler.run(context, &body, &mut ScriptedRuntime::default()).unwrap()
    }

    #[test]
    fn set_context_merges_mappings_and_replaces_scalars() {
        let mut context = Context::from(json!({"db": {"host": "localhost", "port": 5432}, "name": "old"}).as_object().cloned().unwrap());
        run(
            &SetContextStep,
            &mut context,
            json!({"db": {"port": "${{ 6000 + 1 }}"}, "name": "${{ name }}-new", "fresh": [1]}),
        );
        assert_eq!(context.get("db"), Some(&json!({"host": "localhost", "port": 6001})));
        assert_eq!(context.get("name"), Some(&json!("old-new")));
        assert_eq!(context.get("fresh"), Some(&json!([1])));
    }

    #[test]
    fn notes_and_todos_are_rendered_when_added() {
        let mut context = Context::from(json!({"who": "ann"}).as_object().cloned().unwrap());
        run(&MessageStep::Note, &mut context, json!("hello ${{ who }}"));
        run(&MessageStep::Todo, &mut context, json!({"message": "ping ${{ who }}"}));
        assert_eq!(context.notes(), ["hello ann"]);
        assert_eq!(context.todos(), ["ping ann"]);
    }

    #[test]
    fn prompt_stores_typed_answer() {
        let mut context = Context::new();
        let mut runtime = ScriptedRuntime::new([json!("3")]);
        let value = PromptStep
            .run(&mut context, &json!({"name": "replicas", "type": "int"}), &mut runtime)
            .unwrap();
        assert_eq!(value, Some(json!(3)));
        assert_eq!(context.get("replicas"), Some(&json!(3)));
    }

    #[test]
    fn fetch_renders_contents_and_names() {
        let package = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        fs::create_dir_all(package.path().join("src/.git")).unwrap();
        fs::write(package.path().join(".stencil.yaml"), "jobs: {}").unwrap();
        fs::write(package.path().join("src/${{ name }}.txt"), "hi ${{ name }} __VERSION__\n").unwrap();
        fs::write(package.path().join("src/raw.txt"), "keep ${{ name }}").unwrap();
        fs::write(package.path().join("src/skip.log"), "nope").unwrap();
        fs::write(package.path().join("src/.git/HEAD"), "ref").unwrap();

        let mut context = Context::from(json!({"name": "demo"}).as_object().cloned().unwrap());
        context.set_package(package.path(), &RunOptions::new("local"));
        context.set_target(target.path());
        run(
            &FetchStep,
            &mut context,
            json!({"exclude": ["*.log"], "raw": ["src/raw.txt"], "tokens": {"__VERSION__": "1.0"}}),
        );

        let out = target.path();
        assert_eq!(fs::read_to_string(out.join("src/demo.txt")).unwrap(), "hi demo 1.0\n");
        assert_eq!(fs::read_to_string(out.join("src/raw.txt")).unwrap(), "keep ${{ name }}");
        assert!(!out.join("src/skip.log").exists());
        assert!(!out.join("src/.git").exists());
        assert!(!out.join(".stencil.yaml").exists());
    }
}
