//! Run API: executing a job, inspecting a job and discovering job aliases.

use std::env;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use stencil_types::{DEFAULT_SCRIPT_NAME, JobDefinition, LibraryEntry, RunOptions};
use tracing::{debug, info, info_span};
use url::Url;
use walkdir::WalkDir;

use crate::context::Context;
use crate::error::{EngineError, EngineResult};
use crate::executor::execute_steps;
use crate::loader::{self, load_document};
use crate::package::{default_cache_root, fetch_package};
use crate::parameters::process_parameters;
use crate::plugin::PluginRegistry;
use crate::runtime::Runtime;
use crate::template::{render_text, render_value};
use crate::values::to_text;

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Context),
    /// The user cancelled a prompt.
    Aborted,
}

/// Runs the job selected by `options`, then renders the collected notes and
/// todos and hands them to the runtime. An interrupted prompt ends the run
/// with [`RunOutcome::Aborted`].
pub fn run(mut context: Context, options: &RunOptions, runtime: &mut dyn Runtime) -> EngineResult<RunOutcome> {
    match execute_scaffold(&mut context, options, runtime) {
        Ok(()) => {}
        Err(EngineError::Interrupted) => {
            info!(package = %options.package, "run aborted");
            return Ok(RunOutcome::Aborted);
        }
        Err(error) => return Err(error),
    }

    let notes = render_messages(context.notes(), &context)?;
    let todos = render_messages(context.todos(), &context)?;
    context.replace_messages(notes, todos);

    runtime.print_todos(&context);
    runtime.print_notes(&context);
    Ok(RunOutcome::Completed(context))
}

fn render_messages(messages: &[String], context: &Context) -> EngineResult<Vec<String>> {
    messages
        .iter()
        .map(|message| render_text(message, context).map_err(EngineError::from))
        .collect()
}

/// Resolves the package, loads its job document and runs the selected job
/// against `context`.
///
/// Order of events: document todos and notes are queued, plugins are
/// initialized, the document context and then `options.context` are
/// rendered and merged, document parameters are resolved, package provenance
/// is recorded, then the job context and job parameters follow before the
/// steps run.
pub fn execute_scaffold(context: &mut Context, options: &RunOptions, runtime: &mut dyn Runtime) -> EngineResult<()> {
    let span = info_span!("scaffold", package = %options.package, job = %options.job_name());
    let _entered = span.enter();

    let package_dir = package_directory(context, options)?;
    let loaded = loader::load(&package_dir, options)?;
    let job = loaded.job(options.job_name())?.clone();
    let document = &loaded.document;

    for todo in &document.todos {
        context.add_todo(to_text(todo));
    }
    for note in &document.notes {
        context.add_note(to_text(note));
    }

    let registry = PluginRegistry::for_document(&document.plugins, &loaded.directory)?;
    debug!(handlers = ?registry, "plugins initialized");

    let document_context = render_map(&document.context, context)?;
    context.extend(document_context);
    let option_context = render_map(&options.context, context)?;
    context.extend(option_context);
    process_parameters(&document.parameters, context, runtime)?;

    context.set_package(&loaded.directory, options);
    context.reset_steps();

    let job_context = render_map(&job.context, context)?;
    context.extend(job_context);
    process_parameters(&job.parameters, context, runtime)?;

    if !context.has_target() {
        let cwd = env::current_dir().map_err(|error| EngineError::io("failed to read the working directory", error))?;
        context.set_target(&cwd);
    }

    info!(steps = job.steps.len(), target = %context.target_dir().display(), "running job");
    execute_steps(context, runtime, &registry, &job.steps)
}

/// Local directory for `options.package`. Inside a nested run the path is
/// tried relative to the running package first.
fn package_directory(context: &Context, options: &RunOptions) -> EngineResult<PathBuf> {
    let candidate = if context.has_package() {
        context.resolve_package_path(&options.package)
    } else {
        PathBuf::from(&options.package)
    };
    if candidate.exists() {
        debug!(package = %candidate.display(), "using local package");
        return Ok(candidate);
    }
    Ok(fetch_package(&options.package, &cache_root(options))?.dir)
}

fn cache_root(options: &RunOptions) -> PathBuf {
    options.cache_dir.clone().unwrap_or_else(default_cache_root)
}

fn render_map(values: &Map<String, Value>, context: &Context) -> EngineResult<Map<String, Value>> {
    if values.is_empty() {
        return Ok(Map::new());
    }
    match render_value(&Value::Object(values.clone()), context)? {
        Value::Object(rendered) => Ok(rendered),
        _ => Ok(Map::new()),
    }
}

/// A job and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub name: String,
    pub job: JobDefinition,
    /// Base link for files in the package.
    pub html_url: String,
    /// `None` when the job was synthesized.
    pub script: Option<PathBuf>,
    /// Script path relative to the package root, with `/` separators.
    pub script_relative: Option<String>,
    pub script_url: Option<String>,
}

impl JobInfo {
    /// The job mapping with `__html_url`, `__script`, `__script_relative` and
    /// `__script_url` attached.
    pub fn to_value(&self) -> Value {
        let mut value = match serde_json::to_value(&self.job) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        value.insert("__html_url".into(), Value::String(self.html_url.clone()));
        if let Some(script) = &self.script {
            value.insert("__script".into(), Value::String(script.to_string_lossy().into_owned()));
        }
        if let Some(relative) = &self.script_relative {
            value.insert("__script_relative".into(), Value::String(relative.clone()));
        }
        if let Some(url) = &self.script_url {
            value.insert("__script_url".into(), Value::String(url.clone()));
        }
        Value::Object(value)
    }
}

/// Loads the job selected by `options` without running it.
pub fn get_job(options: &RunOptions) -> EngineResult<JobInfo> {
    let package = fetch_package(&options.package, &cache_root(options))?;
    let loaded = loader::load(&package.dir, options)?;
    let name = options.job_name().to_string();
    let job = loaded.job(&name)?.clone();

    let script_relative = loaded.script.as_deref().and_then(|script| relative_slash_path(script, &package.dir));
    let script_url = script_relative.as_deref().map(|relative| join_url(&package.base_url, relative));
    Ok(JobInfo {
        name,
        job,
        html_url: package.base_url,
        script: loaded.script,
        script_relative,
        script_url,
    })
}

fn relative_slash_path(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative.components().map(|part| part.as_os_str().to_string_lossy().into_owned()).collect();
    Some(parts.join("/"))
}

fn join_url(base: &str, relative: &str) -> String {
    Url::parse(base)
        .and_then(|url| url.join(relative))
        .map(String::from)
        .unwrap_or_else(|_| format!("{base}{relative}"))
}

/// Named job documents found in a package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    /// `name/job` aliases in discovery order.
    pub aliases: IndexMap<String, LibraryEntry>,
    /// Base link of the package.
    pub package_path: String,
}

/// Scans a package for `.stencil.yaml` documents that carry a `name` and
/// turns each of their jobs into a `name/job` alias.
pub fn discover(options: &RunOptions) -> EngineResult<Discovery> {
    let package = fetch_package(&options.package, &cache_root(options))?;
    let mut aliases = IndexMap::new();

    let documents = WalkDir::new(&package.dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == DEFAULT_SCRIPT_NAME);

    for entry in documents {
        let document = match load_document(entry.path()) {
            Ok(document) => document,
            Err(error) => {
                debug!(path = %entry.path().display(), %error, "skipping unreadable job document");
                continue;
            }
        };
        let Some(name) = document.name.as_deref() else {
            continue;
        };
        let script = relative_slash_path(entry.path(), &package.dir).unwrap_or_default();
        for (job_name, job) in &document.jobs {
            aliases.insert(
                format!("{name}/{job_name}"),
                LibraryEntry {
                    package: options.package.clone(),
                    job: job_name.clone(),
                    description: job.description.clone().unwrap_or_default(),
                    script: script.clone(),
                },
            );
        }
    }

    debug!(package = %options.package, aliases = aliases.len(), "discovered job aliases");
    Ok(Discovery {
        aliases,
        package_path: package.base_url,
    })
}
