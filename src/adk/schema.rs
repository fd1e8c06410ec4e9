// SPDX-License-Identifier: MIT

//! Structured-output schemas
//!
//! Schemas are derived with schemars and checked with jsonschema.

use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde_json::Value;

/// JSON schema for a Rust type
pub fn schema_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Pull a JSON document out of a model reply
///
/// Accepts bare JSON, fenced ```json blocks, or prose wrapped around a
/// single object.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(v);
            }
        }
    }

    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    if close <= open {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[open..=close]).ok()
}

/// Validate `value` against `schema`, every violation joined into one reason
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    let compiled =
        JSONSchema::compile(schema).map_err(|e| format!("invalid output schema: {}", e))?;
    let result = compiled.validate(value);
    match result {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() { "$".to_string() } else { path };
                format!("{}: {}", path, e)
            })
            .collect::<Vec<_>>()
            .join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Verdict {
        verdict: String,
        score: f64,
        notes: Option<String>,
        citations: Vec<Citation>,
    }

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Citation {
        key: String,
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": 2}\n```"),
            Some(json!({"a": 2}))
        );
        assert_eq!(
            extract_json("The result is {\"a\": 3} as requested."),
            Some(json!({"a": 3}))
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_derived_schema_accepts_valid_record() {
        let schema = schema_for::<Verdict>();
        let value = json!({
            "verdict": "ACCEPT",
            "score": 0.8,
            "notes": null,
            "citations": [{"key": "pmid:1"}]
        });
        assert!(validate(&value, &schema).is_ok());
    }

    #[test]
    fn test_derived_schema_rejects_missing_field() {
        let schema = schema_for::<Verdict>();
        let err = validate(&json!({"verdict": "ACCEPT", "citations": []}), &schema).unwrap_err();
        assert!(err.contains("score"));
    }

    #[test]
    fn test_nested_ref_is_checked() {
        let schema = schema_for::<Verdict>();
        let value = json!({"verdict": "x", "score": 1.0, "citations": [{"title": "no key"}]});
        let err = validate(&value, &schema).unwrap_err();
        assert!(err.contains("/citations/0"));
    }

    #[test]
    fn test_enum_and_type_mismatch() {
        let schema = json!({"type": "string", "enum": ["ACCEPT", "REJECT"]});
        assert!(validate(&json!("ACCEPT"), &schema).is_ok());
        assert!(validate(&json!("MAYBE"), &schema).is_err());
        assert!(validate(&json!(3), &schema).is_err());
    }

    #[test]
    fn test_bounds_and_additional_properties() {
        let schema = json!({
            "type": "object",
            "properties": {"score": {"type": "number", "minimum": 0, "maximum": 1}},
            "required": ["score"],
            "additionalProperties": false
        });
        assert!(validate(&json!({"score": 0.4}), &schema).is_ok());

        let err = validate(&json!({"score": 7.5, "bogus": true}), &schema).unwrap_err();
        assert!(err.contains("/score"));
        assert!(err.contains("bogus"));
    }

    #[test]
    fn test_pattern_and_one_of() {
        let schema = json!({
            "oneOf": [
                {"type": "string", "pattern": "^pmid:[0-9]+$"},
                {"type": "integer"}
            ]
        });
        assert!(validate(&json!("pmid:123"), &schema).is_ok());
        assert!(validate(&json!(42), &schema).is_ok());
        assert!(validate(&json!("doi:10.1/x"), &schema).is_err());
    }

    #[test]
    fn test_invalid_schema_is_reported() {
        let err = validate(&json!(1), &json!({"type": 12})).unwrap_err();
        assert!(err.starts_with("invalid output schema"));
    }
}
