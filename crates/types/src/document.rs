//! Job document schema.
//!
//! A job document is the YAML or JSON file found inside a package. Only the
//! shape needed to select a job is enforced; step bodies, parameter specs and
//! context values stay as raw JSON trees until the engine renders them.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Job selected when the caller does not name one.
pub const DEFAULT_JOB_NAME: &str = "default";

/// Parsed job document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobDocument {
    /// Package name used when building library aliases (`name/job`).
    #[serde(default)]
    pub name: Option<String>,
    /// Declared plugins keyed by plugin name; the value is plugin configuration.
    #[serde(default, deserialize_with = "null_as_default")]
    pub plugins: Map<String, Value>,
    /// Document-level context, rendered and merged before job selection.
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: Map<String, Value>,
    /// Document-level parameter specs.
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<Value>,
    /// Todo templates appended to the run's todo list.
    #[serde(default, deserialize_with = "null_as_default")]
    pub todos: Vec<Value>,
    /// Note templates appended to the run's note list.
    #[serde(default, deserialize_with = "null_as_default")]
    pub notes: Vec<Value>,
    /// Jobs keyed by name, in authoring order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub jobs: IndexMap<String, JobDefinition>,
}

impl JobDocument {
    /// Returns the job registered under `name`, if any.
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }
}

/// A named, ordered list of steps with its own context and parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobDefinition {
    /// Human readable summary shown by `info` and `list`.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<Value>,
    /// Steps in execution order. Each entry is either `{action: body}` or
    /// `{action: "name", with: body, id: "..."}`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Value>,
}

/// Treats an explicit `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
