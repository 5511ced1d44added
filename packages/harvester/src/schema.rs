//! Response schemas for structured model output.
//!
//! Schemas are generated from Rust types with `schemars` and rewritten into
//! the OpenAPI subset the Gemini API accepts:
//! 1. every `$ref` inlined, no `definitions` or `$schema`
//! 2. `"type": ["string", "null"]` becomes `"type": "string", "nullable": true`
//! 3. keywords the API rejects (`title`, `additionalProperties`, `default`)
//!    removed

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Keywords the response schema dialect does not understand.
const UNSUPPORTED_KEYWORDS: &[&str] = &["title", "additionalProperties", "default", "examples"];

/// Formats the response schema dialect accepts.
const SUPPORTED_FORMATS: &[&str] = &["int32", "int64", "float", "double", "enum", "date-time"];

/// Types usable as structured model output.
///
/// Implemented for any type that is `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// The response schema for this type.
    fn response_schema() -> Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        inline_refs(&mut value);

        if let Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }

        to_openapi_subset(&mut value);
        value
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Replace every `$ref` with the schema from `definitions`.
fn inline_refs(value: &mut Value) {
    let definitions = match value {
        Value::Object(map) => map.get("definitions").cloned(),
        _ => None,
    };

    if let Some(defs) = definitions {
        inline_refs_recursive(value, &defs);
    }
}

fn inline_refs_recursive(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(ref_path)) = map.get("$ref").cloned() {
                if let Some(def) = ref_path
                    .strip_prefix("#/definitions/")
                    .and_then(|name| definitions.get(name))
                {
                    *value = def.clone();
                    inline_refs_recursive(value, definitions);
                    return;
                }
            }

            for (_, v) in map.iter_mut() {
                inline_refs_recursive(v, definitions);
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                inline_refs_recursive(item, definitions);
            }
        }
        _ => {}
    }
}

fn to_openapi_subset(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for keyword in UNSUPPORTED_KEYWORDS {
                map.remove(*keyword);
            }
            rewrite_nullable_type(map);
            collapse_nullable_any_of(map);

            let unsupported_format = map
                .get("format")
                .and_then(Value::as_str)
                .is_some_and(|f| !SUPPORTED_FORMATS.contains(&f));
            if unsupported_format {
                map.remove("format");
            }

            for (key, v) in map.iter_mut() {
                // property names are data, not keywords
                if key == "properties" {
                    if let Value::Object(props) = v {
                        for prop in props.values_mut() {
                            to_openapi_subset(prop);
                        }
                    }
                } else {
                    to_openapi_subset(v);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                to_openapi_subset(item);
            }
        }
        _ => {}
    }
}

/// `"type": ["x", "null"]` → `"type": "x", "nullable": true`
fn rewrite_nullable_type(map: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = map.get("type") else {
        return;
    };

    let non_null: Vec<Value> = types.iter().filter(|t| t.as_str() != Some("null")).cloned().collect();
    let nullable = non_null.len() < types.len();

    if let [single] = non_null.as_slice() {
        map.insert("type".into(), single.clone());
    }
    if nullable {
        map.insert("nullable".into(), Value::Bool(true));
    }
}

/// `"anyOf": [{schema}, {"type": "null"}]` → `{schema, "nullable": true}`
fn collapse_nullable_any_of(map: &mut Map<String, Value>) {
    let Some(Value::Array(variants)) = map.get("anyOf") else {
        return;
    };

    let is_null = |v: &Value| v.get("type").and_then(Value::as_str) == Some("null");
    if variants.len() != 2 || !variants.iter().any(is_null) {
        return;
    }

    let inner = variants.iter().find(|v| !is_null(v)).cloned();
    if let Some(Value::Object(inner)) = inner {
        map.remove("anyOf");
        for (k, v) in inner {
            map.entry(k).or_insert(v);
        }
        map.insert("nullable".into(), Value::Bool(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Link {
        url: String,
        year: Option<i32>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Answer {
        /// Where it is
        primary: Option<Link>,
        others: Vec<Link>,
    }

    #[test]
    fn test_refs_are_inlined() {
        let schema = Answer::response_schema();
        let text = serde_json::to_string(&schema).unwrap();

        assert!(!text.contains("$ref"));
        assert!(!text.contains("definitions"));
        assert!(!text.contains("$schema"));
        assert_eq!(schema["properties"]["others"]["items"]["type"], "object");
    }

    #[test]
    fn test_nullable_types_are_rewritten() {
        let schema = Answer::response_schema();

        let year = &schema["properties"]["others"]["items"]["properties"]["year"];
        assert_eq!(year["type"], "integer");
        assert_eq!(year["nullable"], true);

        let primary = &schema["properties"]["primary"];
        assert_eq!(primary["nullable"], true);
        assert_eq!(primary["type"], "object");
    }

    #[test]
    fn test_unsupported_keywords_are_removed() {
        let schema = Answer::response_schema();
        let text = serde_json::to_string(&schema).unwrap();

        assert!(!text.contains("\"title\""));
        assert!(!text.contains("additionalProperties"));
        assert_eq!(schema["properties"]["primary"]["description"], "Where it is");
    }
}
