//! # Snake-Case Response Transformer
//!
//! Converts outbound JSON object keys from camelCase to snake_case at the
//! edge (spec §6, §8). Idempotent on already-snake_case input — running it
//! twice must equal running it once.

use serde_json::Value;

/// `camelCase` -> `snake_case`, stripping a single leading underscore
/// first (spec §6: "strip leading underscore"). Already-snake_case input
/// round-trips unchanged since there's no uppercase to split on.
fn camel_to_snake(key: &str) -> String {
    let key = key.strip_prefix('_').unwrap_or(key);
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.char_indices() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Recursively rewrites object keys; arrays and scalars pass through
/// unchanged except for their nested objects.
pub fn to_snake_case(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let transformed = map
                .into_iter()
                .map(|(k, v)| (camel_to_snake(&k), to_snake_case(v)))
                .collect();
            Value::Object(transformed)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(to_snake_case).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_case_keys_become_snake_case() {
        let input = json!({"userId": 1, "nestedObject": {"createdAt": "x"}});
        let output = to_snake_case(input);
        assert_eq!(output, json!({"user_id": 1, "nested_object": {"created_at": "x"}}));
    }

    #[test]
    fn already_snake_case_input_is_unchanged() {
        let input = json!({"user_id": 1, "created_at": "x"});
        assert_eq!(to_snake_case(input.clone()), input);
    }

    #[test]
    fn transform_is_idempotent() {
        let input = json!({"userId": 1, "items": [{"modelId": "gpt-4o-mini"}]});
        let once = to_snake_case(input);
        let twice = to_snake_case(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn leading_underscore_is_stripped() {
        let input = json!({"_privateField": 1});
        assert_eq!(to_snake_case(input), json!({"private_field": 1}));
    }
}
