//! Context store shared by templates and steps during a run.
//!
//! The context is an ordered mapping of arbitrary values created once per
//! run. A handful of keys are reserved:
//!
//! - `__target`: destination directory for generated files.
//! - `__package`: provenance of the running package (`path`, `options`).
//! - `steps`: scratch space where steps record their results.
//!
//! Notes and todos are kept beside the mapping as append-only lists and are
//! flushed to the runtime when the run finishes.

use std::env;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use stencil_types::RunOptions;
use stencil_util::resolve_against;
use tracing::warn;

pub const TARGET_KEY: &str = "__target";
pub const PACKAGE_KEY: &str = "__package";
pub const STEPS_KEY: &str = "steps";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    values: Map<String, Value>,
    notes: Vec<String>,
    todos: Vec<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All values, in insertion order.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Inserts a value. Writes to `__target` or `__package` after they hold a
    /// value are ignored and reported; returns whether the write happened.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if is_write_once(&key) && self.values.get(&key).is_some_and(|existing| !existing.is_null()) {
            warn!(key = %key, "Ignoring write to a reserved context key that is already set");
            return false;
        }
        self.values.insert(key, value);
        true
    }

    /// Shallow update: each entry of `values` replaces the key it names.
    pub fn extend(&mut self, values: Map<String, Value>) {
        for (key, value) in values {
            self.insert(key, value);
        }
    }

    /// Mutable access to a non-reserved entry, used by steps that merge into
    /// existing mappings.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        if is_write_once(key) {
            return None;
        }
        self.values.get_mut(key)
    }

    /// Destination directory for generated files, defaulting to the working directory.
    pub fn target_dir(&self) -> PathBuf {
        match self.values.get(TARGET_KEY) {
            Some(Value::String(path)) if !path.is_empty() => PathBuf::from(path),
            _ => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn has_target(&self) -> bool {
        self.values.get(TARGET_KEY).is_some_and(|value| !value.is_null())
    }

    pub fn set_target(&mut self, path: &Path) -> bool {
        self.insert(TARGET_KEY, Value::String(path.to_string_lossy().into_owned()))
    }

    /// Directory of the package currently running, if one has been recorded.
    pub fn package_dir(&self) -> Option<PathBuf> {
        self.values
            .get(PACKAGE_KEY)
            .and_then(|package| package.get("path"))
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }

    pub fn has_package(&self) -> bool {
        self.values.get(PACKAGE_KEY).is_some_and(|value| !value.is_null())
    }

    /// Records package provenance. Has no effect once provenance is set.
    pub fn set_package(&mut self, path: &Path, options: &RunOptions) -> bool {
        let options = serde_json::to_value(options).unwrap_or(Value::Null);
        self.insert(
            PACKAGE_KEY,
            json!({
                "path": path.to_string_lossy(),
                "options": options,
            }),
        )
    }

    /// Resolves a path relative to `__target`.
    pub fn resolve_target_path(&self, path: &str) -> PathBuf {
        resolve_against(&self.target_dir(), path)
    }

    /// Resolves a path relative to the running package, or the working
    /// directory when no package is recorded.
    pub fn resolve_package_path(&self, path: &str) -> PathBuf {
        let base = self
            .package_dir()
            .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        resolve_against(&base, path)
    }

    /// Clears the step scratch space.
    pub fn reset_steps(&mut self) {
        self.values.insert(STEPS_KEY.to_string(), Value::Object(Map::new()));
    }

    /// Records a step result under `steps.<id>`, creating the scratch space on first use.
    pub fn record_step(&mut self, id: &str, value: Value) {
        let steps = self.values.entry(STEPS_KEY).or_insert_with(|| Value::Object(Map::new()));
        if !steps.is_object() {
            *steps = Value::Object(Map::new());
        }
        if let Value::Object(map) = steps {
            map.insert(id.to_string(), value);
        }
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn todos(&self) -> &[String] {
        &self.todos
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn add_todo(&mut self, todo: impl Into<String>) {
        self.todos.push(todo.into());
    }

    /// Replaces notes and todos wholesale, used once their templates are rendered.
    pub(crate) fn replace_messages(&mut self, notes: Vec<String>, todos: Vec<String>) {
        self.notes = notes;
        self.todos = todos;
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }
}

fn is_write_once(key: &str) -> bool {
    key == TARGET_KEY || key == PACKAGE_KEY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_are_write_once() {
        let mut context = Context::new();
        assert!(context.set_target(Path::new("/tmp/out")));
        assert!(!context.set_target(Path::new("/tmp/elsewhere")));
        assert!(!context.insert(TARGET_KEY, json!("/tmp/other")));
        assert_eq!(context.target_dir(), PathBuf::from("/tmp/out"));

        assert!(context.set_package(Path::new("/pkgs/app"), &RunOptions::new("acme/app")));
        assert!(!context.set_package(Path::new("/pkgs/other"), &RunOptions::new("acme/other")));
        assert_eq!(context.package_dir(), Some(PathBuf::from("/pkgs/app")));
        assert_eq!(context.get(PACKAGE_KEY).unwrap()["options"]["package"], "acme/app");
    }

    #[test]
    fn null_reserved_keys_can_be_filled() {
        let mut context = Context::from(serde_json::from_value::<Map<String, Value>>(json!({"__target": null})).unwrap());
        assert!(!context.has_target());
        assert!(context.set_target(Path::new("/out")));
    }

    #[test]
    fn paths_resolve_against_target_and_package() {
        let mut context = Context::new();
        context.set_target(Path::new("/work/out"));
        context.set_package(Path::new("/work/pkg"), &RunOptions::new("."));

        assert_eq!(context.resolve_target_path("src/main.rs"), PathBuf::from("/work/out/src/main.rs"));
        assert_eq!(context.resolve_target_path("/abs"), PathBuf::from("/abs"));
        assert_eq!(context.resolve_package_path("templates"), PathBuf::from("/work/pkg/templates"));
    }

    #[test]
    fn steps_scratch_space_is_created_on_demand() {
        let mut context = Context::new();
        context.insert(STEPS_KEY, json!("not a mapping"));
        context.record_step("read", json!("content"));
        assert_eq!(context.get(STEPS_KEY), Some(&json!({"read": "content"})));

        context.reset_steps();
        assert_eq!(context.get(STEPS_KEY), Some(&json!({})));
    }

    #[test]
    fn notes_and_todos_keep_order() {
        let mut context = Context::new();
        context.add_note("first");
        context.add_note("second");
        context.add_todo("wire up CI");
        assert_eq!(context.notes(), ["first", "second"]);
        assert_eq!(context.todos(), ["wire up CI"]);
    }
}
