// SPDX-License-Identifier: MIT

//! Prompt templates with `{channel}` placeholders
//!
//! `{{` and `}}` produce literal braces, so templates can still show JSON
//! examples to the model.

use super::AgentInput;
use crate::adk::error::AgentError;
use serde_json::Value;

/// Channel names referenced by a template, in order of first appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    for segment in segments(template) {
        if let Segment::Placeholder(name) = segment {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Fill every placeholder from the projection
pub fn render(template: &str, input: &AgentInput) -> Result<String, AgentError> {
    let mut out = String::with_capacity(template.len());
    for segment in segments(template) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Brace(c) => out.push(c),
            Segment::Placeholder(name) => {
                let value = input.get(name).ok_or_else(|| AgentError::MissingInput {
                    channel: name.to_string(),
                })?;
                out.push_str(&value_to_text(value));
            }
        }
    }
    Ok(out)
}

/// Convert a JSON value to prompt text
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| format!("{}: {}", k, value_to_text(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Array(arr) => arr
            .iter()
            .map(|v| format!("- {}", value_to_text(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
    }
}

enum Segment<'a> {
    Text(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        if pos > 0 {
            out.push(Segment::Text(&rest[..pos]));
        }
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push(Segment::Brace(tail.as_bytes()[0] as char));
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let name = &tail[1..end];
                if is_identifier(name) {
                    out.push(Segment::Placeholder(name));
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        out.push(Segment::Text(&tail[..1]));
        rest = &tail[1..];
    }

    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(pairs: Vec<(&str, Value)>) -> AgentInput {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_placeholders_in_order() {
        let names = placeholders("Path: {path}\nContext: {context}\nAgain {path}");
        assert_eq!(names, vec!["path", "context"]);
    }

    #[test]
    fn test_render_fills_channels() {
        let rendered = render(
            "Path: {path}\nIteration: {iteration}",
            &input(vec![("path", json!("A -[:r]-> B")), ("iteration", json!(2))]),
        )
        .unwrap();
        assert_eq!(rendered, "Path: A -[:r]-> B\nIteration: 2");
    }

    #[test]
    fn test_escaped_braces_and_json_examples() {
        let rendered = render(
            r#"Reply as {{"verdict": "ACCEPT"}} for {hypothesis}"#,
            &input(vec![("hypothesis", json!("h1"))]),
        )
        .unwrap();
        assert_eq!(rendered, r#"Reply as {"verdict": "ACCEPT"} for h1"#);
        assert!(placeholders(r#"{{"a": 1}}"#).is_empty());
    }

    #[test]
    fn test_unset_channel_renders_empty() {
        let rendered = render("[{critique}]", &input(vec![("critique", Value::Null)])).unwrap();
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn test_unprojected_channel_is_error() {
        let err = render("{secret}", &AgentInput::default()).unwrap_err();
        assert!(matches!(err, AgentError::MissingInput { channel } if channel == "secret"));
    }

    #[test]
    fn test_value_to_text_lists() {
        assert_eq!(value_to_text(&json!(["a", "b"])), "- a\n- b");
        assert_eq!(value_to_text(&json!({"k": 1})), "k: 1");
    }
}
