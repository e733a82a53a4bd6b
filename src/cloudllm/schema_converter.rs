//! Converts JSON-schema-ish tool parameter schemas into each provider's
//! native flavor. Only the Google/Gemini flavor is normative in the spec;
//! OpenAI/Anthropic/OpenRouter pass JSON Schema through unchanged.

use serde_json::{json, Map, Value};

/// Converts a JSON-schema object into Gemini's flavor: uppercased `type`
/// enums, defaulting to `OBJECT` when `type` is absent but `properties` or
/// `required` is present, recursing into `properties[*]` and `items`.
pub fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Null => json!({ "type": "OBJECT", "properties": {} }),
        Value::Object(obj) if obj.is_empty() => json!({ "type": "OBJECT", "properties": {} }),
        Value::Object(obj) => Value::Object(convert_object(obj)),
        other => other.clone(),
    }
}

fn convert_object(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();

    let resolved_type = match obj.get("type").and_then(Value::as_str) {
        Some(t) => Some(uppercase_type(t)),
        None if obj.contains_key("properties") || obj.contains_key("required") => {
            Some("OBJECT".to_string())
        }
        None => None,
    };
    if let Some(t) = resolved_type {
        out.insert("type".to_string(), Value::String(t));
    }

    if let Some(Value::Object(props)) = obj.get("properties") {
        let mut converted_props = Map::new();
        for (k, v) in props {
            converted_props.insert(k.clone(), to_gemini_schema(v));
        }
        out.insert("properties".to_string(), Value::Object(converted_props));
    } else if out.get("type").and_then(Value::as_str) == Some("OBJECT") && !obj.contains_key("properties") {
        out.insert("properties".to_string(), json!({}));
    }

    if let Some(items) = obj.get("items") {
        out.insert("items".to_string(), to_gemini_schema(items));
    }

    for key in ["description", "enum", "format", "minimum", "maximum", "required"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }

    out
}

fn uppercase_type(t: &str) -> String {
    match t {
        "string" => "STRING".to_string(),
        "integer" => "INTEGER".to_string(),
        "number" => "NUMBER".to_string(),
        "boolean" => "BOOLEAN".to_string(),
        "array" => "ARRAY".to_string(),
        "object" => "OBJECT".to_string(),
        other => other.to_ascii_uppercase(),
    }
}
