//! Parameter normalization: merge path/query/body sources into one flat
//! mapping (spec §4.1 step 3, §4.3 routing).
//!
//! Path parameters are applied first and are never overridden by query or
//! body values. Later sources supplement earlier ones; when a key appears
//! in more than one source and the existing value is already a JSON array,
//! the new value is appended rather than replacing it.

use serde_json::{Map, Value};

/// Merge `path`, then `query`, then `body` into one object, per the
/// precedence and list-append rules above.
#[must_use]
pub fn normalize(path: &Map<String, Value>, query: &Map<String, Value>, body: Option<Value>) -> Value {
    let mut merged = path.clone();
    let locked: std::collections::HashSet<&str> = path.keys().map(String::as_str).collect();

    for (key, value) in query {
        apply(&mut merged, &locked, key, value.clone());
    }

    if let Some(Value::Object(body_map)) = body {
        for (key, value) in body_map {
            apply(&mut merged, &locked, &key, value);
        }
    }

    Value::Object(merged)
}

fn apply(target: &mut Map<String, Value>, locked: &std::collections::HashSet<&str>, key: &str, value: Value) {
    if locked.contains(key) {
        return;
    }
    match target.get_mut(key) {
        Some(Value::Array(existing)) => {
            if let Value::Array(new_items) = value {
                existing.extend(new_items);
            } else {
                existing.push(value);
            }
        }
        _ => {
            target.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_params_win_over_query_and_body() {
        let mut path = Map::new();
        path.insert("id".to_string(), json!("7"));
        let mut query = Map::new();
        query.insert("id".to_string(), json!("999"));
        let merged = normalize(&path, &query, None);
        assert_eq!(merged["id"], json!("7"));
    }

    #[test]
    fn array_fields_accumulate_across_sources() {
        let path = Map::new();
        let mut query = Map::new();
        query.insert("tags".to_string(), json!(["a"]));
        let mut body = Map::new();
        body.insert("tags".to_string(), json!(["b", "c"]));
        let merged = normalize(&path, &query, Some(Value::Object(body)));
        assert_eq!(merged["tags"], json!(["a", "b", "c"]));
    }

    #[test]
    fn body_supplements_query_when_keys_differ() {
        let path = Map::new();
        let mut query = Map::new();
        query.insert("a".to_string(), json!(1));
        let mut body = Map::new();
        body.insert("b".to_string(), json!(2));
        let merged = normalize(&path, &query, Some(Value::Object(body)));
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"], json!(2));
    }
}
