//! Layered context supplied on the command line.
//!
//! Layers merge from lowest to highest precedence: the user context file in
//! the stencil home, a `--context-from` file, `.stencilrc.yaml` in the
//! working directory, then explicit `-c key=value` assignments.

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use serde_json::{Map, Value};
use stencil_util::{merge_maps, read_context_file};

/// Context file picked up from the working directory.
pub const CWD_CONTEXT_FILE: &str = ".stencilrc.yaml";

/// Splits a `key=value` assignment. The value is parsed as YAML so that
/// `-c replicas=3` yields a number; anything unparsable stays a string.
pub fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = assignment.split_once('=') else {
        bail!("context assignment '{assignment}' must look like key=value");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("context assignment '{assignment}' has an empty key");
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok((key.to_string(), Value::String(String::new())));
    }
    let value = match serde_yaml::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Reads every layer that exists and merges them, the later layer winning.
pub fn merged_context(user_file: &Path, from_file: Option<&Path>, cwd: &Path, assignments: &[String]) -> Result<Map<String, Value>> {
    let mut merged = read_layer(user_file)?;
    if let Some(path) = from_file {
        if !path.is_file() {
            bail!("context file {} does not exist", path.display());
        }
        merge_maps(&mut merged, &read_layer(path)?);
    }
    merge_maps(&mut merged, &read_layer(&cwd.join(CWD_CONTEXT_FILE))?);

    let mut explicit = Map::new();
    for assignment in assignments {
        let (key, value) = parse_assignment(assignment)?;
        explicit.insert(key, value);
    }
    merge_maps(&mut merged, &explicit);
    Ok(merged)
}

fn read_layer(path: &Path) -> Result<Map<String, Value>> {
    read_context_file(path).with_context(|| format!("failed to read context file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    #[test]
    fn assignments_keep_scalar_types() {
        assert_eq!(parse_assignment("replicas=3").unwrap(), ("replicas".into(), json!(3)));
        assert_eq!(parse_assignment("tls=true").unwrap(), ("tls".into(), json!(true)));
        assert_eq!(parse_assignment("url=http://x?a=b").unwrap(), ("url".into(), json!("http://x?a=b")));
        assert_eq!(parse_assignment("list=[1, 2]").unwrap(), ("list".into(), json!("[1, 2]")));
        assert_eq!(parse_assignment("empty=").unwrap(), ("empty".into(), json!("")));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn later_layers_win() {
        let home = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let user = home.path().join("context.yaml");
        fs::write(&user, "owner: home\nregion: eu\nteam: {lead: ann, size: 3}\n").unwrap();
        let from = home.path().join("shared.json");
        fs::write(&from, r#"{"region": "us", "team": {"size": 4}}"#).unwrap();
        fs::write(cwd.path().join(CWD_CONTEXT_FILE), "owner: local\n").unwrap();

        let merged = merged_context(&user, Some(&from), cwd.path(), &["region=ap".into()]).unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({"owner": "local", "region": "ap", "team": {"lead": "ann", "size": 4}})
        );
    }

    #[test]
    fn missing_optional_layers_are_skipped() {
        let cwd = tempfile::tempdir().unwrap();
        let merged = merged_context(&cwd.path().join("absent.yaml"), None, cwd.path(), &[]).unwrap();
        assert!(merged.is_empty());

        let error = merged_context(&cwd.path().join("absent.yaml"), Some(&cwd.path().join("nope.yaml")), cwd.path(), &[]).unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }
}
