//! Error taxonomy for a scaffolding run.

use std::path::PathBuf;

use thiserror::Error;

use crate::template::{RenderError, UtilityError};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed reference, or a clone/pull that failed.
    #[error("failed to resolve package '{reference}': {message}")]
    PackageResolution { reference: String, message: String },

    #[error("job '{job}' not found in {document}")]
    JobNotFound { job: String, document: String },

    #[error("unknown plugin '{plugin}' for action '{action}'")]
    UnknownPlugin { plugin: String, action: String },

    #[error("unknown action '{action}'")]
    UnknownAction { action: String },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch { url: String, expected: String, actual: String },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    /// Answer rejected by a validation pattern; runtimes recover by asking again.
    #[error("value for '{parameter}' does not match {pattern}")]
    ParameterValidation { parameter: String, pattern: String },

    /// The user cancelled a prompt. Runs end cleanly on this.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Render(RenderError),

    #[error("invalid step at position {index}: {message}")]
    InvalidStep { index: usize, message: String },

    #[error("cannot convert {value} to {target}")]
    Conversion { value: String, target: String },

    #[error("invalid job document {path}: {message}")]
    Document { path: PathBuf, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A step handler failed.
    #[error("step '{action}' failed: {source:#}")]
    Step {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn package(reference: impl Into<String>, message: impl ToString) -> Self {
        Self::PackageResolution {
            reference: reference.into(),
            message: message.to_string(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn conversion(value: &serde_json::Value, target: impl Into<String>) -> Self {
        Self::Conversion {
            value: value.to_string(),
            target: target.into(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Download failures raised inside templates surface with their own variants
/// so callers can match on them without unpacking the render error.
impl From<RenderError> for EngineError {
    fn from(error: RenderError) -> Self {
        match error {
            RenderError::Utility(UtilityError::ChecksumMismatch { url, expected, actual }) => Self::ChecksumMismatch { url, expected, actual },
            RenderError::Utility(UtilityError::Download { url, message }) => Self::Download { url, message },
            other => Self::Render(other),
        }
    }
}
