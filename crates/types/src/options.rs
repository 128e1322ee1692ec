//! Options describing a single invocation of the engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::DEFAULT_JOB_NAME;

/// Job document name tried when no script is given.
pub const DEFAULT_SCRIPT_NAME: &str = ".stencil.yaml";

/// Invocation options, recorded under `__package.options` for provenance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunOptions {
    /// Local path or `[host/]owner/repo[@version]` reference.
    pub package: String,
    #[serde(default)]
    pub job: Option<String>,
    /// Job document hint; see the loader for the lookup order.
    #[serde(default)]
    pub script: Option<String>,
    /// Context rendered and merged after the document context.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Steps used by the synthesized job when the package has no job document.
    #[serde(default)]
    pub steps: Option<Vec<Value>>,
    /// Cache root for remote packages.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..Self::default()
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn job_name(&self) -> &str {
        self.job.as_deref().unwrap_or(DEFAULT_JOB_NAME)
    }

    pub fn script_name(&self) -> &str {
        self.script.as_deref().unwrap_or(DEFAULT_SCRIPT_NAME)
    }
}
