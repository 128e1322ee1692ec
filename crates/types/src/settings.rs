//! User settings persisted in the stencil home directory.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::parameter::ParameterOverride;

/// A discovered job alias (`package-name/job`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryEntry {
    /// Package reference the alias runs.
    pub package: String,
    pub job: String,
    #[serde(default)]
    pub description: String,
    /// Job document path relative to the package root.
    #[serde(default)]
    pub script: String,
}

/// Contents of `config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Package used when `run` is invoked without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Cache root for remote packages; defaults to `<home>/packages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_overrides: Vec<ParameterOverride>,
    /// Saved aliases keyed by package reference, then alias name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub library: IndexMap<String, IndexMap<String, LibraryEntry>>,
}

impl UserSettings {
    /// Finds an alias across all saved packages.
    pub fn alias(&self, name: &str) -> Option<&LibraryEntry> {
        self.library.values().find_map(|aliases| aliases.get(name))
    }

    /// Iterates every saved alias in package order.
    pub fn aliases(&self) -> impl Iterator<Item = (&String, &LibraryEntry)> {
        self.library.values().flat_map(|aliases| aliases.iter())
    }
}
