//! Reading YAML and JSON documents into value trees.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructuredFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// True when the path's extension marks it as JSON.
pub fn is_json_path(path: &Path) -> bool {
    path.extension().and_then(|extension| extension.to_str()).is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}

/// Parses `content` as JSON when `path` has a `.json` extension and as YAML otherwise.
/// An empty YAML document yields `Value::Null`.
pub fn parse_structured(content: &str, path: &Path) -> Result<Value, StructuredFileError> {
    if is_json_path(path) {
        return serde_json::from_str(content).map_err(|source| StructuredFileError::Json {
            path: path.to_path_buf(),
            source,
        });
    }
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(content).map_err(|source| StructuredFileError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and parses a YAML or JSON file.
pub fn read_structured(path: &Path) -> Result<Value, StructuredFileError> {
    let content = fs::read_to_string(path).map_err(|source| StructuredFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_structured(&content, path)
}
