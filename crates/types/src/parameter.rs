//! Parameter and prompt specifications.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared type of a parameter value.
///
/// Unknown type names fall back to [`ParameterType::Str`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParameterType {
    Int,
    Bool,
    #[default]
    Str,
    Float,
    /// Multi-select list.
    Checklist,
    /// Yes/no confirmation.
    Confirm,
    /// URL decomposed into its parts.
    Url,
    /// Git remote URL decomposed into host/owner/repo.
    GitUrl,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::Int => "int",
            ParameterType::Bool => "bool",
            ParameterType::Str => "str",
            ParameterType::Float => "float",
            ParameterType::Checklist => "checklist",
            ParameterType::Confirm => "confirm",
            ParameterType::Url => "url",
            ParameterType::GitUrl => "giturl",
        }
    }
}

impl From<String> for ParameterType {
    fn from(value: String) -> Self {
        ParameterType::from(value.as_str())
    }
}

impl From<&str> for ParameterType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => ParameterType::Int,
            "bool" | "boolean" => ParameterType::Bool,
            "float" | "number" => ParameterType::Float,
            "checklist" | "list" => ParameterType::Checklist,
            "confirm" => ParameterType::Confirm,
            "url" => ParameterType::Url,
            "giturl" | "git_url" => ParameterType::GitUrl,
            _ => ParameterType::Str,
        }
    }
}

impl From<ParameterType> for String {
    fn from(value: ParameterType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata handed to the runtime when a value has to be asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptSpec {
    /// Identity of the prompt; also the context key written by the prompt step.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default, rename = "type")]
    pub parameter_type: Option<ParameterType>,
    /// Allowed answers; a non-empty list turns the prompt into a selection.
    #[serde(default)]
    pub choices: Vec<Value>,
    /// Regular expression the answer must match.
    #[serde(default)]
    pub validate: Option<String>,
    /// Hide the answer while it is typed.
    #[serde(default)]
    pub secure: bool,
    /// Free-form metadata not understood by stencil itself.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PromptSpec {
    /// Text shown to the user: the description when present, else the name.
    pub fn label(&self) -> String {
        match &self.description {
            Some(Value::String(text)) if !text.is_empty() => text.clone(),
            Some(Value::Null) | None => self.name.clone(),
            Some(Value::String(_)) => self.name.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Declared type, defaulting to string.
    pub fn value_type(&self) -> ParameterType {
        self.parameter_type.unwrap_or_default()
    }
}

/// A parameter declared by a job document or a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    #[serde(flatten)]
    pub prompt: PromptSpec,
    /// Context key that supplies the value. Defaults to `name`.
    #[serde(default)]
    pub context_source: Option<String>,
    /// Context key that receives the value. Defaults to `name`.
    #[serde(default)]
    pub context_target: Option<String>,
    /// Gate evaluated after rendering; when false the default is used without asking.
    #[serde(default, rename = "if")]
    pub condition: Option<Value>,
}

impl ParameterSpec {
    pub fn name(&self) -> &str {
        &self.prompt.name
    }

    pub fn source_key(&self) -> &str {
        self.context_source.as_deref().unwrap_or(&self.prompt.name)
    }

    pub fn target_key(&self) -> &str {
        self.context_target.as_deref().unwrap_or(&self.prompt.name)
    }
}

/// Global rule that patches parameter specs by name before they are resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterOverride {
    /// Parameter names the rule applies to.
    #[serde(default)]
    pub names: Vec<String>,
    /// Fields deep-merged onto the matching parameter spec; these win on conflict.
    #[serde(default)]
    pub overrides: Map<String, Value>,
}

impl ParameterOverride {
    pub fn applies_to(&self, name: &str) -> bool {
        self.names.iter().any(|candidate| candidate == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_types_fall_back_to_string() {
        assert_eq!(ParameterType::from("something-else"), ParameterType::Str);
        assert_eq!(ParameterType::from("Integer"), ParameterType::Int);
        assert_eq!(ParameterType::from("giturl"), ParameterType::GitUrl);
    }

    #[test]
    fn parameter_spec_splits_prompt_metadata_from_routing() {
        let spec: ParameterSpec = serde_json::from_value(json!({
            "name": "service",
            "description": "Service name",
            "type": "str",
            "context_target": "service_name",
            "if": true,
            "placeholder": "api"
        }))
        .unwrap();

        assert_eq!(spec.name(), "service");
        assert_eq!(spec.source_key(), "service");
        assert_eq!(spec.target_key(), "service_name");
        assert_eq!(spec.condition, Some(json!(true)));
        assert_eq!(spec.prompt.label(), "Service name");
        assert_eq!(spec.prompt.extra.get("placeholder"), Some(&json!("api")));
        assert!(!spec.prompt.extra.contains_key("context_target"));
    }

    #[test]
    fn label_falls_back_to_name() {
        let prompt = PromptSpec {
            name: "region".into(),
            ..PromptSpec::default()
        };
        assert_eq!(prompt.label(), "region");
        assert_eq!(prompt.value_type(), ParameterType::Str);
    }

    #[test]
    fn override_matches_by_name() {
        let rule: ParameterOverride = serde_json::from_value(json!({
            "names": ["owner", "team"],
            "overrides": { "default": "platform" }
        }))
        .unwrap();

        assert!(rule.applies_to("team"));
        assert!(!rule.applies_to("region"));
    }
}
