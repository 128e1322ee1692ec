//! Locating, parsing and selecting from job documents.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use stencil_types::{JobDefinition, JobDocument, RunOptions};
use stencil_util::read_structured;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

const EXTENSIONS: [&str; 4] = [".yaml", ".yml", ".json", ""];
const NESTED_DOCUMENT: &str = ".stencil";

/// Jobs that exist even when a package has no job document.
const SYNTHESIZED_JOBS: [&str; 2] = ["scaffold", "default"];

/// File names tried for `hint`, in lookup order: every extension is tried
/// against the hint, its dot-prefixed form and `<hint>/.stencil` before
/// moving to the next extension.
pub fn candidate_names(hint: &str) -> Vec<String> {
    let names = [hint.to_string(), format!(".{hint}"), format!("{hint}/{NESTED_DOCUMENT}")];
    EXTENSIONS
        .iter()
        .flat_map(|extension| names.iter().map(move |name| format!("{name}{extension}")))
        .collect()
}

/// First candidate under `package_dir` that is a regular file.
pub fn locate(package_dir: &Path, hint: &str) -> Option<PathBuf> {
    candidate_names(hint).into_iter().map(|name| package_dir.join(name)).find(|path| {
        debug!(path = %path.display(), "looking for job document");
        path.is_file()
    })
}

pub fn load_document(path: &Path) -> EngineResult<JobDocument> {
    let document_error = |message: String| EngineError::Document {
        path: path.to_path_buf(),
        message,
    };
    match read_structured(path).map_err(|error| document_error(error.to_string()))? {
        // An empty file parses to null and holds no jobs.
        Value::Null => Ok(JobDocument::default()),
        value => serde_json::from_value(value).map_err(|error| document_error(error.to_string())),
    }
}

/// Stand-in document for a package without a job file: a single job that
/// copies the package into the target. `options.steps` replaces the default
/// fetch step.
pub fn synthesized_document(job_name: &str, options: &RunOptions) -> JobDocument {
    let mut document = JobDocument::default();
    if !SYNTHESIZED_JOBS.contains(&job_name) {
        return document;
    }
    let steps = options.steps.clone().unwrap_or_else(|| {
        vec![json!({
            "action": "fetch",
            "with": {"source": "${{ source | default(\".\") }}"},
        })]
    });
    document.jobs.insert(
        job_name.to_string(),
        JobDefinition {
            description: Some("Scaffold all the files for this package".to_string()),
            steps,
            ..JobDefinition::default()
        },
    );
    document
}

/// A job document together with where it was found.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: JobDocument,
    /// Directory holding the document; the package directory when synthesized.
    pub directory: PathBuf,
    /// `None` for a synthesized document.
    pub script: Option<PathBuf>,
}

impl LoadedDocument {
    /// Looks up `job`, failing with [`EngineError::JobNotFound`].
    pub fn job(&self, job: &str) -> EngineResult<&JobDefinition> {
        self.document.job(job).ok_or_else(|| EngineError::JobNotFound {
            job: job.to_string(),
            document: self.label(),
        })
    }

    fn label(&self) -> String {
        match &self.script {
            Some(script) => script.display().to_string(),
            None => format!("{} (no job document)", self.directory.display()),
        }
    }
}

/// Loads the job document for `options` from `package_dir`, synthesizing one
/// when the package has none.
pub fn load(package_dir: &Path, options: &RunOptions) -> EngineResult<LoadedDocument> {
    match locate(package_dir, options.script_name()) {
        Some(script) => {
            debug!(script = %script.display(), "using job document");
            let document = load_document(&script)?;
            let directory = script.parent().map(Path::to_path_buf).unwrap_or_else(|| package_dir.to_path_buf());
            Ok(LoadedDocument {
                document,
                directory,
                script: Some(script),
            })
        }
        None => {
            debug!(package = %package_dir.display(), "no job document found, synthesizing one");
            Ok(LoadedDocument {
                document: synthesized_document(options.job_name(), options),
                directory: package_dir.to_path_buf(),
                script: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn candidates_follow_extension_major_order() {
        let names = candidate_names("build");
        assert_eq!(names.len(), 12);
        assert_eq!(&names[..4], ["build.yaml", ".build.yaml", "build/.stencil.yaml", "build.yml"]);
        assert_eq!(&names[9..], ["build", ".build", "build/.stencil"]);
    }

    #[test]
    fn locate_prefers_earlier_candidates_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build.yaml")).unwrap();
        fs::write(dir.path().join(".build.yaml"), "jobs: {}").unwrap();
        fs::write(dir.path().join("build.json"), "{}").unwrap();
        assert_eq!(locate(dir.path(), "build"), Some(dir.path().join(".build.yaml")));
        assert_eq!(locate(dir.path(), "missing"), None);
    }

    #[test]
    fn nested_documents_set_the_job_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("web")).unwrap();
        fs::write(dir.path().join("web/.stencil.yaml"), "jobs:\n  default:\n    steps: []\n").unwrap();
        let loaded = load(dir.path(), &RunOptions::new(".").with_script("web")).unwrap();
        assert_eq!(loaded.directory, dir.path().join("web"));
        assert!(loaded.job("default").is_ok());
    }

    #[test]
    fn missing_document_synthesizes_a_fetch_job() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(dir.path(), &RunOptions::new(".").with_job("scaffold")).unwrap();
        assert!(loaded.script.is_none());
        let job = loaded.job("scaffold").unwrap();
        assert_eq!(job.steps, vec![json!({"action": "fetch", "with": {"source": "${{ source | default(\".\") }}"}})]);

        let error = loaded.job("deploy").unwrap_err();
        assert!(matches!(error, EngineError::JobNotFound { job, .. } if job == "deploy"));
        assert!(synthesized_document("deploy", &RunOptions::default()).jobs.is_empty());
    }

    #[test]
    fn invalid_documents_report_their_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".stencil.yaml");
        fs::write(&path, "jobs: [1, 2]").unwrap();
        let error = load_document(&path).unwrap_err();
        assert!(matches!(error, EngineError::Document { path: reported, .. } if reported == path));
    }
}
