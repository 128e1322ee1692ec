//! Deep merge of JSON value trees.

use serde_json::{Map, Value};

/// Merges `overlay` into `target`. Mappings merge key by key and recurse;
/// anything else in `overlay` replaces what `target` held.
pub fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => merge_maps(target_map, overlay_map),
        (target_value, overlay_value) => *target_value = overlay_value.clone(),
    }
}

/// Map flavour of [`deep_merge`].
pub fn merge_maps(target: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, overlay_value) in overlay {
        let both_mappings = overlay_value.is_object() && target.get(key).is_some_and(Value::is_object);
        match target.get_mut(key) {
            Some(existing) if both_mappings => deep_merge(existing, overlay_value),
            _ => {
                target.insert(key.clone(), overlay_value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_wins_on_scalar_conflicts() {
        let mut target = json!({"name": "p", "default": 1, "type": "int"});
        deep_merge(&mut target, &json!({"default": 5}));
        assert_eq!(target, json!({"name": "p", "default": 5, "type": "int"}));
    }

    #[test]
    fn nested_mappings_are_merged_recursively() {
        let mut target = json!({"db": {"host": "localhost", "port": 5432}});
        deep_merge(&mut target, &json!({"db": {"port": 6543, "user": "app"}}));
        assert_eq!(target, json!({"db": {"host": "localhost", "port": 6543, "user": "app"}}));
    }

    #[test]
    fn sequences_are_replaced_not_concatenated() {
        let mut target = json!({"choices": ["a", "b"]});
        deep_merge(&mut target, &json!({"choices": ["c"]}));
        assert_eq!(target, json!({"choices": ["c"]}));
    }
}
