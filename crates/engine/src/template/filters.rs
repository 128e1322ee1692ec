//! Filters, tests and string methods available inside expressions.

use std::path::Path;

use serde_json::Value;

use super::RenderError;
use super::eval::CallArgs;
use crate::values::{compare, float_value, is_truthy, loose_eq, to_text};

pub(crate) fn apply_filter(name: &str, value: Value, args: &CallArgs) -> Result<Value, RenderError> {
    let filtered = match name {
        "formatlist" => format_list(value, &args.text_or(0, "format", "{value}"))?,
        "yaml" => Value::String(yaml_format(&value)?),
        "json" => Value::String(json_format(&value, args.get(0, "indent"))?),
        "join_path" => match value {
            Value::Null => Value::String("null".into()),
            base => Value::String(Path::new(&to_text(&base)).join(args.text(0, "added_path")?).to_string_lossy().into_owned()),
        },
        "default" | "d" => {
            let replace = if args.flag(1, "boolean") { !is_truthy(&value) } else { value.is_null() };
            if replace { args.get(0, "default_value").cloned().unwrap_or(Value::Null) } else { value }
        }
        "upper" => Value::String(to_text(&value).to_uppercase()),
        "lower" => Value::String(to_text(&value).to_lowercase()),
        "title" => Value::String(title_case(&to_text(&value))),
        "capitalize" => Value::String(capitalize(&to_text(&value))),
        "trim" => Value::String(to_text(&value).trim().to_string()),
        "replace" => Value::String(to_text(&value).replace(&args.text(0, "old")?, &args.text_or(1, "new", ""))),
        "string" => Value::String(to_text(&value)),
        "quote" => Value::String(format!("\"{}\"", to_text(&value).replace('"', "\\\""))),
        "indent" => Value::String(indent(&to_text(&value), args.integer_or(0, "width", 4)?, args.flag(1, "first"))),
        "basename" => Value::String(path_part(&value, |path| path.file_name())),
        "dirname" => Value::String(
            Path::new(&to_text(&value))
                .parent()
                .map(|parent| parent.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        "length" | "count" => Value::from(length(&value)),
        "first" => sequence(value).into_iter().next().unwrap_or(Value::Null),
        "last" => sequence(value).pop().unwrap_or(Value::Null),
        "join" => {
            let separator = args.text_or(0, "d", "");
            Value::String(sequence(value).iter().map(to_text).collect::<Vec<_>>().join(&separator))
        }
        "list" => Value::Array(sequence(value)),
        "reverse" => match value {
            Value::String(text) => Value::String(text.chars().rev().collect()),
            other => Value::Array(sequence(other).into_iter().rev().collect()),
        },
        "sort" => {
            let mut items = sequence(value);
            items.sort_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal));
            if args.flag(0, "reverse") {
                items.reverse();
            }
            Value::Array(items)
        }
        "unique" => {
            let mut unique: Vec<Value> = Vec::new();
            for item in sequence(value) {
                if !unique.iter().any(|seen| loose_eq(seen, &item)) {
                    unique.push(item);
                }
            }
            Value::Array(unique)
        }
        "keys" => match value {
            Value::Object(map) => Value::Array(map.keys().cloned().map(Value::String).collect()),
            _ => Value::Array(Vec::new()),
        },
        "values" => match value {
            Value::Object(map) => Value::Array(map.into_iter().map(|(_, entry)| entry).collect()),
            _ => Value::Array(Vec::new()),
        },
        "items" => match value {
            Value::Object(map) => Value::Array(
                map.into_iter()
                    .map(|(key, entry)| Value::Array(vec![Value::String(key), entry]))
                    .collect(),
            ),
            _ => Value::Array(Vec::new()),
        },
        "int" => to_integer(&value).map(Value::from).unwrap_or_else(|| Value::from(args.integer_or(0, "default", 0).unwrap_or(0))),
        "float" => float_value(to_float(&value).unwrap_or(0.0)),
        "bool" => Value::Bool(match &value {
            Value::String(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "t" | "1" | "y" | "on"),
            other => is_truthy(other),
        }),
        other => return Err(RenderError::UnknownFilter(other.to_string())),
    };
    Ok(filtered)
}

pub(crate) fn apply_test(name: &str, value: &Value, args: &CallArgs) -> Result<bool, RenderError> {
    Ok(match name {
        "defined" => !value.is_null(),
        "undefined" => value.is_null(),
        "none" => value.is_null(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "float" => value.is_f64(),
        "boolean" => value.is_boolean(),
        "mapping" => value.is_object(),
        "sequence" | "iterable" => value.is_array() || value.is_string() || value.is_object(),
        "true" => value == &Value::Bool(true),
        "false" => value == &Value::Bool(false),
        "empty" => !is_truthy(value) && !value.is_boolean(),
        "even" => to_integer(value).is_some_and(|number| number % 2 == 0),
        "odd" => to_integer(value).is_some_and(|number| number % 2 != 0),
        "divisibleby" => {
            let divisor = args.integer_or(0, "num", 1)?;
            divisor != 0 && to_integer(value).is_some_and(|number| number % divisor == 0)
        }
        "eq" | "equalto" | "sameas" => args.get(0, "other").is_some_and(|other| loose_eq(value, other)),
        "in" => match args.get(0, "seq") {
            Some(Value::Array(items)) => items.iter().any(|item| loose_eq(item, value)),
            Some(Value::Object(map)) => map.contains_key(&to_text(value)),
            Some(Value::String(text)) => text.contains(&to_text(value)),
            _ => false,
        },
        other => return Err(RenderError::UnknownTest(other.to_string())),
    })
}

/// `value.method(...)` calls on strings, lists and mappings.
pub(crate) fn call_method(name: &str, receiver: Value, args: &CallArgs) -> Result<Value, RenderError> {
    match (name, &receiver) {
        ("startswith", Value::String(text)) => Ok(Value::Bool(text.starts_with(&args.text(0, "prefix")?))),
        ("endswith", Value::String(text)) => Ok(Value::Bool(text.ends_with(&args.text(0, "suffix")?))),
        ("strip", Value::String(text)) => Ok(Value::String(text.trim().to_string())),
        ("lstrip", Value::String(text)) => Ok(Value::String(text.trim_start().to_string())),
        ("rstrip", Value::String(text)) => Ok(Value::String(text.trim_end().to_string())),
        ("split", Value::String(text)) => {
            let parts: Vec<Value> = match args.get(0, "sep") {
                Some(Value::String(separator)) if !separator.is_empty() => text.split(separator.as_str()).map(Value::from).collect(),
                _ => text.split_whitespace().map(Value::from).collect(),
            };
            Ok(Value::Array(parts))
        }
        ("join", Value::String(separator)) => {
            let items = args.get(0, "iterable").cloned().unwrap_or(Value::Null);
            Ok(Value::String(sequence(items).iter().map(to_text).collect::<Vec<_>>().join(separator)))
        }
        ("get", Value::Object(map)) => Ok(map
            .get(&args.text(0, "key")?)
            .cloned()
            .unwrap_or_else(|| args.get(1, "default").cloned().unwrap_or(Value::Null))),
        ("keys" | "values" | "items", Value::Object(_)) => apply_filter(name, receiver, &CallArgs::default()),
        ("upper" | "lower" | "title" | "capitalize" | "replace", Value::String(_)) => apply_filter(name, receiver, args),
        _ => Err(RenderError::evaluation(format!("'{name}' is not a method of {}", crate::values::kind_name(&receiver)))),
    }
}

fn format_list(value: Value, pattern: &str) -> Result<Value, RenderError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => return Err(RenderError::evaluation(format!("formatlist expects a sequence, got {other}"))),
    };
    Ok(Value::Array(
        items
            .iter()
            .enumerate()
            .map(|(index, item)| Value::String(pattern.replace("{value}", &to_text(item)).replace("{index}", &index.to_string())))
            .collect(),
    ))
}

fn yaml_format(value: &Value) -> Result<String, RenderError> {
    if value.is_null() {
        return Ok("null".into());
    }
    let rendered = serde_yaml::to_string(value).map_err(|error| RenderError::evaluation(format!("yaml filter: {error}")))?;
    Ok(rendered.trim_end().to_string())
}

fn json_format(value: &Value, indent: Option<&Value>) -> Result<String, RenderError> {
    let rendered = match indent {
        Some(Value::Number(_)) => serde_json::to_string_pretty(value),
        _ => serde_json::to_string(value),
    };
    rendered.map_err(|error| RenderError::evaluation(format!("json filter: {error}")))
}

fn sequence(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(key, _)| Value::String(key)).collect(),
        Value::String(text) => text.chars().map(|c| Value::String(c.to_string())).collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn length(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(text) => text.chars().count(),
        _ => 0,
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn title_case(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut at_word_start = true;
    for character in text.chars() {
        if character.is_alphanumeric() {
            if at_word_start {
                output.extend(character.to_uppercase());
            } else {
                output.extend(character.to_lowercase());
            }
            at_word_start = false;
        } else {
            output.push(character);
            at_word_start = true;
        }
    }
    output
}

fn capitalize(text: &str) -> String {
    let mut characters = text.chars();
    match characters.next() {
        Some(first) => first.to_uppercase().chain(characters.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn indent(text: &str, width: i64, first: bool) -> String {
    let padding = " ".repeat(usize::try_from(width).unwrap_or_default());
    text.split('\n')
        .enumerate()
        .map(|(index, line)| {
            if (index == 0 && !first) || line.is_empty() {
                line.to_string()
            } else {
                format!("{padding}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn path_part(value: &Value, part: impl Fn(&Path) -> Option<&std::ffi::OsStr>) -> String {
    let text = to_text(value);
    part(Path::new(&text)).map(|segment| segment.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn args(positional: Vec<Value>) -> CallArgs {
        CallArgs {
            positional,
            keyword: Map::new(),
        }
    }

    #[test]
    fn formatlist_applies_pattern_to_each_item() {
        let formatted = apply_filter("formatlist", json!(["a", "b"]), &args(vec![json!("- {index}: {value}")])).unwrap();
        assert_eq!(formatted, json!(["- 0: a", "- 1: b"]));
    }

    #[test]
    fn yaml_filter_emits_block_style() {
        let rendered = apply_filter("yaml", json!({"name": "api", "ports": [80, 443]}), &CallArgs::default()).unwrap();
        assert_eq!(rendered, json!("name: api\nports:\n- 80\n- 443"));
        assert_eq!(apply_filter("yaml", Value::Null, &CallArgs::default()).unwrap(), json!("null"));
    }

    #[test]
    fn json_and_join_path_filters() {
        assert_eq!(apply_filter("json", json!({"a": [1]}), &CallArgs::default()).unwrap(), json!(r#"{"a":[1]}"#));
        assert_eq!(apply_filter("join_path", json!("src"), &args(vec![json!("main.rs")])).unwrap(), json!("src/main.rs"));
    }

    #[test]
    fn default_replaces_null_and_optionally_falsy() {
        assert_eq!(apply_filter("default", Value::Null, &args(vec![json!(".")])).unwrap(), json!("."));
        assert_eq!(apply_filter("default", json!(""), &args(vec![json!(".")])).unwrap(), json!(""));
        assert_eq!(apply_filter("default", json!(""), &args(vec![json!("."), json!(true)])).unwrap(), json!("."));
    }

    #[test]
    fn string_filters() {
        assert_eq!(apply_filter("title", json!("hello big world"), &CallArgs::default()).unwrap(), json!("Hello Big World"));
        assert_eq!(apply_filter("capitalize", json!("hELLO"), &CallArgs::default()).unwrap(), json!("Hello"));
        assert_eq!(apply_filter("indent", json!("a\nb"), &args(vec![json!(2)])).unwrap(), json!("a\n  b"));
        assert_eq!(apply_filter("join", json!([1, "x"]), &args(vec![json!(",")])).unwrap(), json!("1,x"));
    }

    #[test]
    fn unknown_filter_is_an_error() {
        assert!(matches!(
            apply_filter("nope", Value::Null, &CallArgs::default()),
            Err(RenderError::UnknownFilter(name)) if name == "nope"
        ));
    }

    #[test]
    fn tests_and_methods() {
        assert!(apply_test("defined", &json!(0), &CallArgs::default()).unwrap());
        assert!(apply_test("divisibleby", &json!(9), &args(vec![json!(3)])).unwrap());
        assert_eq!(
            call_method("split", json!("a,b"), &args(vec![json!(",")])).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(call_method("startswith", json!("stencil"), &args(vec![json!("st")])).unwrap(), json!(true));
    }
}
