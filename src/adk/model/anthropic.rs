// SPDX-License-Identifier: MIT

//! Anthropic Model - Claude Messages API implementation

use super::{retry_after, GenerationConfig, Model};
use crate::adk::error::ModelError;
use crate::adk::message::{Message, Role, ToolCall};
use crate::adk::tool::Tool;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::env;
use std::sync::Arc;

const PROVIDER: &str = "anthropic";

/// Anthropic Claude model implementation
pub struct AnthropicModel {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicModel {
    /// Create a new AnthropicModel
    ///
    /// Requires `ANTHROPIC_API_KEY` environment variable to be set.
    /// Optionally uses `ANTHROPIC_BASE_URL` for custom endpoints.
    pub fn new() -> Result<Self, ModelError> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ModelError::ApiKeyMissing("Anthropic".to_string()))?;
        let base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string());

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url,
        })
    }

    /// Join every system message into the top-level system prompt
    fn extract_system_message(history: &[Message]) -> Option<String> {
        let system: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        }
    }

    /// Convert a message to Anthropic message format
    fn to_anthropic_message(message: &Message) -> Option<serde_json::Value> {
        let mut blocks = Vec::new();

        let role = match message.role {
            // Skip system messages (handled separately)
            Role::System => return None,
            Role::User => "user",
            Role::Assistant => "assistant",
            // Tool results travel back as user turns
            Role::Tool => "user",
        };

        if !message.content.is_empty() {
            blocks.push(json!({ "type": "text", "text": message.content }));
        }

        for call in &message.tool_calls {
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.args
            }));
        }

        for response in &message.tool_responses {
            blocks.push(json!({
                "type": "tool_result",
                "tool_use_id": response.call_id,
                "content": serde_json::to_string(&response.content).unwrap_or_default()
            }));
        }

        if blocks.is_empty() {
            return None;
        }

        Some(json!({ "role": role, "content": blocks }))
    }

    /// Convert tools to Anthropic tool format
    fn tools_to_anthropic_format(tools: &[Arc<dyn Tool>]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "input_schema": t.schema()
                })
            })
            .collect()
    }

    /// Parse Anthropic response into a Message
    fn parse_anthropic_response(response: &serde_json::Value) -> Result<Message, ModelError> {
        let content_blocks = response["content"].as_array().ok_or_else(|| {
            ModelError::InvalidResponse("No content in Anthropic response".to_string())
        })?;

        let mut text = String::new();
        let mut calls = Vec::new();

        for block in content_blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    args: block["input"].clone(),
                }),
                _ => {}
            }
        }

        if let Some(stop_reason) = response["stop_reason"].as_str() {
            log::debug!("Anthropic stop reason: {}", stop_reason);
        }

        Ok(Message::tool_request(text, calls))
    }
}

#[async_trait]
impl Model for AnthropicModel {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate_content(
        &self,
        model_id: &str,
        history: &[Message],
        config: &GenerationConfig,
        tools: &[Arc<dyn Tool>],
    ) -> Result<Message, ModelError> {
        let url = format!("{}/messages", self.base_url);

        let messages: Vec<serde_json::Value> = history
            .iter()
            .filter_map(Self::to_anthropic_message)
            .collect();

        let mut body = json!({
            "model": model_id,
            "messages": messages,
            "max_tokens": config.max_output_tokens.unwrap_or(4096)
        });

        if let Some(sys) = Self::extract_system_message(history) {
            body["system"] = json!(sys);
        }
        if let Some(temp) = config.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(top_p) = config.top_p {
            body["top_p"] = json!(top_p);
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::tools_to_anthropic_format(tools));
        }

        log::debug!(
            "Anthropic request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ModelError::RateLimited {
                retry_after_secs: retry_after(&resp),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let resp_json: serde_json::Value = resp.json().await?;
        log::debug!("Anthropic response: {}", resp_json);

        Self::parse_anthropic_response(&resp_json)
    }
}
