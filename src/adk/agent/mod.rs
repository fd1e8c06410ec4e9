// SPDX-License-Identifier: MIT

//! Agent module - the unit of work the executor schedules
//!
//! An agent reads a snapshot projection of the blackboard and returns a
//! partial update: channel writes plus the messages it produced. Agents
//! never touch shared state themselves; the executor merges the update.
//!
//! - `LlmAgent` - data-configured agent backed by the LLM adapter

mod llm;
pub mod template;

pub use llm::{extract_json_path, BindMode, LlmAgent, LlmAgentConfig, OutputBinding};

use crate::adk::error::AgentError;
use crate::adk::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single channel write inside a partial update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Write {
    /// Overwrite a scalar or record; raises a counter to `value` if larger
    Set { channel: String, value: Value },
    /// Extend a list-append channel
    Append { channel: String, values: Vec<Value> },
    /// Add to a counter exactly once
    Increment { channel: String, by: u64 },
}

impl Write {
    pub fn set(channel: impl Into<String>, value: Value) -> Self {
        Write::Set {
            channel: channel.into(),
            value,
        }
    }

    pub fn append(channel: impl Into<String>, values: Vec<Value>) -> Self {
        Write::Append {
            channel: channel.into(),
            values,
        }
    }

    pub fn increment(channel: impl Into<String>) -> Self {
        Write::Increment {
            channel: channel.into(),
            by: 1,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Write::Set { channel, .. }
            | Write::Append { channel, .. }
            | Write::Increment { channel, .. } => channel,
        }
    }
}

/// Partial state update returned by an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub writes: Vec<Write>,
    pub messages: Vec<Message>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Channels touched by this update, in write order
    pub fn channels(&self) -> Vec<&str> {
        self.writes.iter().map(|w| w.channel()).collect()
    }
}

/// Read-only projection of the blackboard handed to an agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentInput {
    values: BTreeMap<String, Value>,
}

impl AgentInput {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    /// Value of a projected channel; `None` when the channel was not projected
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.values.get(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.values.contains_key(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}

impl FromIterator<(String, Value)> for AgentInput {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Core agent trait
///
/// Given the same projection and the same model responses an agent must
/// produce the same update.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the agent name
    fn name(&self) -> &str;

    /// Channels projected into the agent's input
    fn reads(&self) -> &[String];

    /// Channels the agent may write
    fn writes(&self) -> &[String];

    /// Run the agent on a snapshot projection
    async fn run(&self, input: AgentInput) -> Result<StateUpdate, AgentError>;
}
