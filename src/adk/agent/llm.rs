// SPDX-License-Identifier: MIT

//! LLM Agent - a data-configured agent backed by the LLM adapter
//!
//! Behaviour comes entirely from configuration: instructions, a prompt
//! template, an optional response schema, a tool subset and output
//! bindings from the reply onto channels.

use super::{template, Agent, AgentInput, StateUpdate, Write};
use crate::adk::error::AgentError;
use crate::adk::llm::{InvokeOptions, LlmAdapter};
use crate::adk::message::Message;
use crate::adk::model::GenerationConfig;
use crate::adk::schema;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// How a bound value lands on its channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Set,
    Append,
}

/// Maps part of the reply onto a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub channel: String,
    /// Dot path into the structured record; `None` binds the reply text
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub mode: BindMode,
}

impl OutputBinding {
    pub fn text(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            path: None,
            mode: BindMode::Set,
        }
    }

    pub fn field(channel: impl Into<String>, path: impl Into<String>, mode: BindMode) -> Self {
        Self {
            channel: channel.into(),
            path: Some(path.into()),
            mode,
        }
    }
}

/// Immutable agent configuration
#[derive(Debug, Clone, Default)]
pub struct LlmAgentConfig {
    pub name: String,
    pub instructions: String,
    pub prompt: String,
    pub model_id: String,
    pub reads: Vec<String>,
    pub bindings: Vec<OutputBinding>,
    /// Counter channel bumped once per successful run
    pub increments: Option<String>,
    pub generation: GenerationConfig,
}

/// Standard LLM agent
pub struct LlmAgent {
    config: LlmAgentConfig,
    writes: Vec<String>,
    adapter: Arc<LlmAdapter>,
    tools: Vec<Arc<dyn Tool>>,
}

impl LlmAgent {
    pub fn new(
        config: LlmAgentConfig,
        adapter: Arc<LlmAdapter>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Self {
        let mut writes: Vec<String> = Vec::new();
        let declared = config
            .bindings
            .iter()
            .map(|b| &b.channel)
            .chain(config.increments.iter());
        for channel in declared {
            if !writes.contains(channel) {
                writes.push(channel.clone());
            }
        }

        Self {
            config,
            writes,
            adapter,
            tools,
        }
    }

    pub fn config(&self) -> &LlmAgentConfig {
        &self.config
    }

    fn bind_outputs(
        &self,
        text: &str,
        record: Option<&Value>,
    ) -> Result<Vec<Write>, AgentError> {
        let mut writes = Vec::with_capacity(self.config.bindings.len() + 1);

        for binding in &self.config.bindings {
            let value = match &binding.path {
                None => Value::String(text.trim().to_string()),
                Some(path) => {
                    let record = record.ok_or_else(|| {
                        AgentError::InvalidOutput(format!(
                            "agent '{}' binds '{}' but the reply has no JSON record",
                            self.config.name, path
                        ))
                    })?;
                    match extract_json_path(record, path) {
                        Some(v) => v,
                        None => {
                            log::warn!(
                                "Agent {} reply has no field '{}', leaving '{}' untouched",
                                self.config.name,
                                path,
                                binding.channel
                            );
                            continue;
                        }
                    }
                }
            };

            let write = match (binding.mode, value) {
                (_, Value::Null) => continue,
                (BindMode::Set, v) => Write::set(&binding.channel, v),
                (BindMode::Append, Value::Array(items)) => Write::append(&binding.channel, items),
                (BindMode::Append, v) => Write::append(&binding.channel, vec![v]),
            };
            writes.push(write);
        }

        if let Some(counter) = &self.config.increments {
            writes.push(Write::increment(counter));
        }
        Ok(writes)
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn reads(&self) -> &[String] {
        &self.config.reads
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, input: AgentInput) -> Result<StateUpdate, AgentError> {
        let prompt = template::render(&self.config.prompt, &input)?;
        let mut messages = Vec::with_capacity(2);
        if !self.config.instructions.is_empty() {
            messages.push(Message::system(self.config.instructions.clone()));
        }
        messages.push(Message::user(prompt));

        let options = InvokeOptions {
            generation: self.config.generation.clone(),
            tools: self.tools.clone(),
        };

        log::info!(
            "Agent {} invoking {} with {} tools",
            self.config.name,
            self.config.model_id,
            self.tools.len()
        );
        let invocation = self
            .adapter
            .invoke(&messages, &self.config.model_id, &options)
            .await?;

        let record = invocation
            .parsed
            .clone()
            .or_else(|| schema::extract_json(&invocation.message.content));
        let writes = self.bind_outputs(&invocation.message.content, record.as_ref())?;

        let name = self.config.name.as_str();
        let trail = invocation
            .trail
            .into_iter()
            .map(|m| if m.name.is_none() { m.with_name(name) } else { m })
            .collect();

        Ok(StateUpdate {
            writes,
            messages: trail,
        })
    }
}

/// Extract a value from JSON using a simple dot-notation path
pub fn extract_json_path(json: &Value, path: &str) -> Option<Value> {
    let mut current = json;
    for part in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(current.clone())
}
