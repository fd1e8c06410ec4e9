// SPDX-License-Identifier: MIT

//! Channel schema definitions

use super::reference::Reference;
use crate::adk::message::Message;
use crate::hypogen::subgraph::Subgraph;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const SUBGRAPH: &str = "subgraph";
pub const CONTEXT: &str = "context";
pub const PATH: &str = "path";
pub const GRAPH: &str = "graph";
pub const PATHS: &str = "paths";
pub const MECHANISTIC_SUMMARIES: &str = "mechanistic_summaries";
pub const LITERATURE: &str = "literature";
pub const HYPOTHESIS: &str = "hypothesis";
pub const CRITIQUE: &str = "critique";
pub const REFERENCES: &str = "references";
pub const MESSAGES: &str = "messages";
pub const ITERATION: &str = "iteration";
pub const SCORE: &str = "score";
pub const TITLE: &str = "title";
pub const STATEMENT: &str = "statement";
pub const SUMMARY: &str = "summary";
pub const FAILED_BRANCH: &str = "failed_branch";

/// Merge kind of a channel
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Overwrite; at most one writer per step
    #[default]
    Scalar,
    /// Structured object with scalar semantics
    Record,
    /// Ordered concatenation
    Append,
    /// Monotonic non-decreasing integer
    Counter,
}

impl ChannelKind {
    /// Scalar-like channels may not have concurrent writers
    pub fn is_exclusive(self) -> bool {
        matches!(self, ChannelKind::Scalar | ChannelKind::Record)
    }
}

/// Value type of a channel; for append channels, the element type
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    /// Number in [0, 1]
    Fraction,
    Integer,
    Boolean,
    Array,
    Object,
    Reference,
    Subgraph,
    Message,
    #[default]
    Any,
}

impl FieldType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Fraction => value.as_f64().map_or(false, |n| (0.0..=1.0).contains(&n)),
            FieldType::Integer => value.is_u64() || value.is_i64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Reference => Reference::normalize(value).is_some(),
            FieldType::Subgraph => serde_json::from_value::<Subgraph>(value.clone()).is_ok(),
            FieldType::Message => serde_json::from_value::<Message>(value.clone()).is_ok(),
            FieldType::Any => true,
        }
    }
}

/// Definition of a single channel
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChannelDef {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub kind: ChannelKind,
    /// Drop appended values whose key was already seen
    #[serde(default)]
    pub dedupe: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ChannelDef {
    pub fn new(kind: ChannelKind, field_type: FieldType) -> Self {
        Self {
            field_type,
            kind,
            dedupe: false,
            default: None,
        }
    }

    pub fn scalar(field_type: FieldType) -> Self {
        Self::new(ChannelKind::Scalar, field_type)
    }

    pub fn record() -> Self {
        Self::new(ChannelKind::Record, FieldType::Object)
    }

    pub fn append(field_type: FieldType) -> Self {
        Self::new(ChannelKind::Append, field_type)
    }

    pub fn counter() -> Self {
        Self::new(ChannelKind::Counter, FieldType::Integer)
    }

    pub fn deduped(mut self) -> Self {
        self.dedupe = true;
        self
    }

    /// Initial value when the channel is created
    pub fn initial(&self) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match self.kind {
            ChannelKind::Append => json!([]),
            ChannelKind::Counter => json!(0),
            ChannelKind::Scalar | ChannelKind::Record => Value::Null,
        }
    }
}

/// Schema of the blackboard
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct StateSchema {
    #[serde(flatten)]
    pub channels: BTreeMap<String, ChannelDef>,
}

impl StateSchema {
    /// The channels every hypothesis pipeline carries
    pub fn hypothesis() -> Self {
        let text = || ChannelDef::scalar(FieldType::String);
        Self::default()
            .with(SUBGRAPH, ChannelDef::scalar(FieldType::Subgraph))
            .with(CONTEXT, text())
            .with(PATH, text())
            .with(GRAPH, text())
            .with(PATHS, ChannelDef::record())
            .with(MECHANISTIC_SUMMARIES, ChannelDef::record())
            .with(LITERATURE, text())
            .with(HYPOTHESIS, text())
            .with(CRITIQUE, text())
            .with(REFERENCES, ChannelDef::append(FieldType::Reference).deduped())
            .with(MESSAGES, ChannelDef::append(FieldType::Message))
            .with(ITERATION, ChannelDef::counter())
            .with(SCORE, ChannelDef::scalar(FieldType::Fraction))
            .with(TITLE, text())
            .with(STATEMENT, text())
            .with(SUMMARY, text())
            .with(FAILED_BRANCH, ChannelDef::append(FieldType::String))
    }

    pub fn with(mut self, name: impl Into<String>, def: ChannelDef) -> Self {
        self.channels.insert(name.into(), def);
        self
    }

    /// Overlay pipeline-declared channels; redefining a built-in keeps the built-in
    pub fn extend(&mut self, extra: StateSchema) {
        for (name, def) in extra.channels {
            match self.channels.get(&name) {
                Some(existing) if *existing != def => {
                    log::warn!("Ignoring redefinition of built-in channel '{}'", name);
                }
                _ => {
                    self.channels.insert(name, def);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ChannelDef> {
        self.channels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<ChannelKind> {
        self.channels.get(name).map(|d| d.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_deserialize() {
        let yaml = r#"
            novelty:
              type: string
            votes:
              type: string
              kind: append
            rounds:
              kind: counter
              type: integer
        "#;
        let schema: StateSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.channels.len(), 3);
        assert_eq!(schema.kind("novelty"), Some(ChannelKind::Scalar));
        assert_eq!(schema.kind("votes"), Some(ChannelKind::Append));
        assert_eq!(schema.get("rounds").unwrap().initial(), json!(0));
    }

    #[test]
    fn test_hypothesis_channels() {
        let schema = StateSchema::hypothesis();
        assert_eq!(schema.kind(ITERATION), Some(ChannelKind::Counter));
        assert_eq!(schema.kind(MESSAGES), Some(ChannelKind::Append));
        assert!(schema.get(REFERENCES).unwrap().dedupe);
        assert!(schema.kind(PATHS).unwrap().is_exclusive());
        assert!(!schema.kind(FAILED_BRANCH).unwrap().is_exclusive());
    }

    #[test]
    fn test_extend_keeps_builtins() {
        let mut schema = StateSchema::hypothesis();
        schema.extend(
            StateSchema::default()
                .with("novelty", ChannelDef::scalar(FieldType::String))
                .with(ITERATION, ChannelDef::scalar(FieldType::String)),
        );
        assert!(schema.contains("novelty"));
        assert_eq!(schema.kind(ITERATION), Some(ChannelKind::Counter));
    }

    #[test]
    fn test_field_type_accepts() {
        assert!(FieldType::String.accepts(&json!("x")));
        assert!(!FieldType::String.accepts(&json!(1)));
        assert!(FieldType::Integer.accepts(&json!(3)));
        assert!(!FieldType::Integer.accepts(&json!(3.5)));
        assert!(FieldType::Reference.accepts(&json!("PMID: 123")));
        assert!(FieldType::Reference.accepts(&json!({"title": "A paper"})));
        assert!(!FieldType::Reference.accepts(&json!(42)));
        assert!(!FieldType::Subgraph.accepts(&json!({"nodes": []})));
        assert!(FieldType::Any.accepts(&Value::Null));
    }
}
