//! Stencil home directory and user settings persistence.
//!
//! The home directory (`~/.stencil` unless `STENCIL_HOME` says otherwise)
//! holds the YAML settings file, the user-level context file, and the cache
//! of cloned packages.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs_next::home_dir;
use serde_json::{Map, Value};
use stencil_types::UserSettings;
use thiserror::Error;
use tracing::warn;

use crate::expand_tilde;

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "STENCIL_HOME";

pub const SETTINGS_FILE_NAME: &str = "config.yaml";

pub const CONTEXT_FILE_NAME: &str = "context.yaml";

const PACKAGES_DIR_NAME: &str = "packages";

/// Error surfaced when reading or writing settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

/// Layout of the stencil home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StencilHome {
    root: PathBuf,
}

impl StencilHome {
    /// Resolves the home directory from `STENCIL_HOME` or the user's home.
    pub fn locate() -> Self {
        if let Ok(path) = env::var(HOME_ENV) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Self::at(expand_tilde(trimmed));
            }
        }
        Self::at(home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".stencil"))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE_NAME)
    }

    /// User-level context merged beneath every run's context.
    pub fn context_path(&self) -> PathBuf {
        self.root.join(CONTEXT_FILE_NAME)
    }

    /// Default cache root for cloned packages.
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(PACKAGES_DIR_NAME)
    }
}

/// YAML-backed store for [`UserSettings`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    persist_to_disk: bool,
}

impl SettingsStore {
    pub fn open(home: &StencilHome) -> Self {
        Self {
            path: home.settings_path(),
            persist_to_disk: true,
        }
    }

    /// In-memory store used when nothing should touch the disk.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            persist_to_disk: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads settings; a missing file yields defaults, an unparsable one is
    /// logged and also yields defaults.
    pub fn load(&self) -> Result<UserSettings, SettingsError> {
        if !self.persist_to_disk {
            return Ok(UserSettings::default());
        }
        match fs::read_to_string(&self.path) {
            Ok(data) if data.trim().is_empty() => Ok(UserSettings::default()),
            Ok(data) => match serde_yaml::from_str(&data) {
                Ok(settings) => Ok(settings),
                Err(error) => {
                    warn!(
                        path = %self.path.display(),
                        error = %error,
                        "Failed to parse settings file; using defaults"
                    );
                    Ok(UserSettings::default())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(UserSettings::default()),
            Err(error) => Err(SettingsError::Io(error)),
        }
    }

    pub fn save(&self, settings: &UserSettings) -> Result<(), SettingsError> {
        if !self.persist_to_disk {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_yaml::to_string(settings)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

/// Reads an optional context file into a mapping. Missing files and
/// non-mapping documents yield an empty mapping.
pub fn read_context_file(path: &Path) -> Result<Map<String, Value>, crate::StructuredFileError> {
    if !path.is_file() {
        return Ok(Map::new());
    }
    match crate::read_structured(path)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => {
            warn!(path = %path.display(), kind = %value_kind(&other), "Context file is not a mapping; ignoring it");
            Ok(Map::new())
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
