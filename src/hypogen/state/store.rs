// SPDX-License-Identifier: MIT

//! Runtime blackboard storage

use super::reference::Reference;
use super::schema::{ChannelKind, FieldType, StateSchema, MESSAGES, REFERENCES};
use crate::adk::agent::{AgentInput, Write};
use crate::adk::message::Message;
use crate::hypogen::error::StateError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Typed, channel-structured shared state
///
/// Only the executor holds a `&mut Blackboard`; agents see snapshots.
#[derive(Debug, Clone)]
pub struct Blackboard {
    schema: Arc<StateSchema>,
    values: BTreeMap<String, Value>,
    messages: Vec<Message>,
}

impl Blackboard {
    /// Create a blackboard with every channel at its initial value
    pub fn new(schema: Arc<StateSchema>) -> Self {
        let values = schema
            .channels
            .iter()
            .filter(|(name, _)| name.as_str() != MESSAGES)
            .map(|(name, def)| (name.clone(), def.initial()))
            .collect();

        Self {
            schema,
            values,
            messages: Vec::new(),
        }
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Apply one write under the channel's merge rule
    pub fn apply(&mut self, write: &Write) -> Result<(), StateError> {
        let channel = write.channel();
        let def = self
            .schema
            .get(channel)
            .ok_or_else(|| StateError::UnknownChannel(channel.to_string()))?
            .clone();

        match (def.kind, write) {
            (ChannelKind::Scalar | ChannelKind::Record, Write::Set { value, .. }) => {
                if !value.is_null() {
                    check_type(channel, def.field_type, value)?;
                }
                self.values.insert(channel.to_string(), value.clone());
            }
            (ChannelKind::Counter, Write::Set { value, .. }) => {
                let proposed = as_count(channel, value)?;
                let current = self.count(channel);
                if proposed > current {
                    self.values.insert(channel.to_string(), Value::from(proposed));
                }
            }
            (ChannelKind::Counter, Write::Increment { by, .. }) => {
                let next = self.count(channel).saturating_add(*by);
                self.values.insert(channel.to_string(), Value::from(next));
            }
            (ChannelKind::Append, Write::Append { values, .. }) if channel == MESSAGES => {
                for value in values {
                    let message: Message = serde_json::from_value(value.clone()).map_err(|_| {
                        StateError::TypeMismatch {
                            channel: channel.to_string(),
                            expected: FieldType::Message,
                            value: value.to_string(),
                        }
                    })?;
                    self.messages.push(message);
                }
            }
            (ChannelKind::Append, Write::Append { values, .. }) => {
                let mut prepared = Vec::with_capacity(values.len());
                for value in values {
                    prepared.push(prepare_element(channel, def.field_type, value)?);
                }

                let entry = self
                    .values
                    .entry(channel.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    for value in prepared {
                        if def.dedupe && items.iter().any(|v| same_key(v, &value)) {
                            log::debug!("Dropping duplicate entry on '{}'", channel);
                            continue;
                        }
                        items.push(value);
                    }
                }
            }
            (kind, write) => {
                return Err(StateError::KindMismatch {
                    channel: channel.to_string(),
                    kind,
                    op: match write {
                        Write::Set { .. } => "set",
                        Write::Append { .. } => "append",
                        Write::Increment { .. } => "increment",
                    },
                })
            }
        }
        Ok(())
    }

    /// Append trace messages; the message log is never rewritten
    pub fn append_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get a channel value; unset scalars are `Null`
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.values.get(channel)
    }

    /// Get a nested value using dot notation (e.g. `paths.summary`)
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    /// Text of a channel, if set and non-empty
    pub fn text(&self, channel: &str) -> Option<&str> {
        self.get(channel)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn count(&self, channel: &str) -> u64 {
        self.get(channel).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    pub fn list(&self, channel: &str) -> &[Value] {
        match self.get(channel) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn references(&self) -> Vec<Reference> {
        self.list(REFERENCES)
            .iter()
            .filter_map(Reference::normalize)
            .collect()
    }

    /// Snapshot projection of the declared channels
    pub fn project(&self, channels: &[String]) -> AgentInput {
        channels
            .iter()
            .map(|name| {
                let value = if name == MESSAGES {
                    serde_json::to_value(&self.messages).unwrap_or(Value::Null)
                } else {
                    self.values.get(name).cloned().unwrap_or(Value::Null)
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Convert state to a JSON object (messages included)
    pub fn to_json(&self) -> Value {
        let mut obj: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        obj.insert(
            MESSAGES.to_string(),
            serde_json::to_value(&self.messages).unwrap_or(Value::Null),
        );
        Value::Object(obj)
    }
}

fn check_type(channel: &str, expected: FieldType, value: &Value) -> Result<(), StateError> {
    if expected.accepts(value) {
        Ok(())
    } else {
        Err(StateError::TypeMismatch {
            channel: channel.to_string(),
            expected,
            value: value.to_string(),
        })
    }
}

fn as_count(channel: &str, value: &Value) -> Result<u64, StateError> {
    value.as_u64().ok_or_else(|| StateError::TypeMismatch {
        channel: channel.to_string(),
        expected: FieldType::Integer,
        value: value.to_string(),
    })
}

/// Type-check an append element, normalizing references to their canonical shape
fn prepare_element(channel: &str, expected: FieldType, value: &Value) -> Result<Value, StateError> {
    if expected == FieldType::Reference {
        return Reference::normalize(value)
            .and_then(|r| serde_json::to_value(r).ok())
            .ok_or_else(|| StateError::TypeMismatch {
                channel: channel.to_string(),
                expected,
                value: value.to_string(),
            });
    }
    check_type(channel, expected, value)?;
    Ok(value.clone())
}

/// Dedup identity: the `key` field when present, otherwise the whole value
fn same_key(a: &Value, b: &Value) -> bool {
    match (a.get("key"), b.get("key")) {
        (Some(ka), Some(kb)) => ka == kb,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypogen::state::schema::{
        ChannelDef, CRITIQUE, FAILED_BRANCH, ITERATION, SCORE, SUBGRAPH,
    };
    use serde_json::json;

    fn board() -> Blackboard {
        let schema = StateSchema::hypothesis()
            .with("novelty", ChannelDef::scalar(FieldType::String))
            .with("notes", ChannelDef::append(FieldType::String));
        Blackboard::new(Arc::new(schema))
    }

    #[test]
    fn test_initial_values() {
        let state = board();
        assert_eq!(state.get(CRITIQUE), Some(&Value::Null));
        assert_eq!(state.count(ITERATION), 0);
        assert!(state.list(FAILED_BRANCH).is_empty());
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_scalar_overwrite() {
        let mut state = board();
        state.apply(&Write::set("novelty", json!("first"))).unwrap();
        state.apply(&Write::set("novelty", json!("second"))).unwrap();
        assert_eq!(state.text("novelty"), Some("second"));
    }

    #[test]
    fn test_scalar_type_checked() {
        let mut state = board();
        let err = state.apply(&Write::set("novelty", json!(3))).unwrap_err();
        assert!(matches!(err, StateError::TypeMismatch { .. }));

        let err = state
            .apply(&Write::set(SUBGRAPH, json!({"not": "a subgraph"})))
            .unwrap_err();
        assert!(matches!(err, StateError::TypeMismatch { .. }));
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        let mut state = board();
        state.apply(&Write::set(SCORE, json!(0.75))).unwrap();
        state.apply(&Write::set(SCORE, json!(1))).unwrap();

        for bad in [json!(7.5), json!(-0.1), json!("0.5")] {
            let err = state.apply(&Write::set(SCORE, bad)).unwrap_err();
            assert!(matches!(
                err,
                StateError::TypeMismatch { expected: FieldType::Fraction, .. }
            ));
        }
        assert_eq!(state.get(SCORE), Some(&json!(1)));
    }

    #[test]
    fn test_unknown_channel() {
        let mut state = board();
        let err = state.apply(&Write::set("nope", json!("x"))).unwrap_err();
        assert_eq!(err, StateError::UnknownChannel("nope".to_string()));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut state = board();
        assert!(matches!(
            state.apply(&Write::append("novelty", vec![json!("x")])),
            Err(StateError::KindMismatch { .. })
        ));
        assert!(matches!(
            state.apply(&Write::increment("novelty")),
            Err(StateError::KindMismatch { .. })
        ));
        assert!(matches!(
            state.apply(&Write::set("notes", json!("x"))),
            Err(StateError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_counter_rules() {
        let mut state = board();
        state.apply(&Write::increment(ITERATION)).unwrap();
        state.apply(&Write::increment(ITERATION)).unwrap();
        assert_eq!(state.count(ITERATION), 2);

        // Set keeps the maximum
        state.apply(&Write::set(ITERATION, json!(1))).unwrap();
        assert_eq!(state.count(ITERATION), 2);
        state.apply(&Write::set(ITERATION, json!(5))).unwrap();
        assert_eq!(state.count(ITERATION), 5);
    }

    #[test]
    fn test_append_preserves_order() {
        let mut state = board();
        state
            .apply(&Write::append("notes", vec![json!("a"), json!("b")]))
            .unwrap();
        state.apply(&Write::append("notes", vec![json!("c")])).unwrap();
        assert_eq!(state.list("notes"), &[json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_references_dedupe_keeps_first() {
        let mut state = board();
        state
            .apply(&Write::append(
                REFERENCES,
                vec![
                    json!("Doe J. First report. PMID: 42"),
                    json!({"title": "Other paper", "year": 2001}),
                ],
            ))
            .unwrap();
        state
            .apply(&Write::append(
                REFERENCES,
                vec![json!({"pmid": "42", "title": "Duplicate"}), json!("Third")],
            ))
            .unwrap();

        let refs = state.references();
        let keys: Vec<&str> = refs.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["pmid:42", "other paper", "third"]);
        assert_eq!(refs[0].title, "Doe J. First report. PMID: 42");
    }

    #[test]
    fn test_messages_append_only() {
        let mut state = board();
        state.append_messages(vec![Message::user("one")]);
        state
            .apply(&Write::append(
                MESSAGES,
                vec![serde_json::to_value(Message::assistant("two")).unwrap()],
            ))
            .unwrap();
        let contents: Vec<&str> = state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[test]
    fn test_projection_is_snapshot() {
        let mut state = board();
        state.apply(&Write::set(CRITIQUE, json!("REJECT"))).unwrap();
        let input = state.project(&[CRITIQUE.to_string(), ITERATION.to_string()]);
        state.apply(&Write::set(CRITIQUE, json!("ACCEPT"))).unwrap();

        assert_eq!(input.get(CRITIQUE), Some(&json!("REJECT")));
        assert_eq!(input.get(ITERATION), Some(&json!(0)));
        assert!(input.get("novelty").is_none());
    }

    #[test]
    fn test_get_path() {
        let schema = StateSchema::hypothesis();
        let mut state = Blackboard::new(Arc::new(schema));
        state
            .apply(&Write::set("paths", json!({"steps": [{"relation": "r1"}]})))
            .unwrap();
        assert_eq!(state.get_path("paths.steps.0.relation"), Some(&json!("r1")));
        assert_eq!(state.get_path("paths.missing"), None);
    }
}
