// SPDX-License-Identifier: MIT

//! OpenAI Model - Chat Completions API implementation

use super::{retry_after, GenerationConfig, Model};
use crate::adk::error::ModelError;
use crate::adk::message::{Message, Role, ToolCall};
use crate::adk::tool::Tool;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::env;
use std::sync::Arc;

const PROVIDER: &str = "openai";

/// OpenAI chat model implementation
pub struct OpenAIModel {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIModel {
    /// Create a new OpenAIModel
    ///
    /// Requires `OPENAI_API_KEY` environment variable to be set.
    /// Optionally uses `OPENAI_BASE_URL` for custom endpoints.
    pub fn new() -> Result<Self, ModelError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ModelError::ApiKeyMissing("OpenAI".to_string()))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url,
        })
    }

    /// Convert a message to one or more OpenAI messages
    ///
    /// A tool turn fans out into one `tool` message per response.
    fn to_openai_messages(message: &Message) -> Vec<serde_json::Value> {
        match message.role {
            Role::Tool => message
                .tool_responses
                .iter()
                .map(|r| {
                    json!({
                        "role": "tool",
                        "tool_call_id": r.call_id,
                        "content": serde_json::to_string(&r.content).unwrap_or_default()
                    })
                })
                .collect(),
            Role::Assistant if message.has_tool_calls() => {
                let tool_calls: Vec<serde_json::Value> = message
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": serde_json::to_string(&c.args).unwrap_or_default()
                            }
                        })
                    })
                    .collect();
                let content = if message.content.is_empty() {
                    serde_json::Value::Null
                } else {
                    json!(message.content)
                };
                vec![json!({ "role": "assistant", "content": content, "tool_calls": tool_calls })]
            }
            role => vec![json!({ "role": role.to_string(), "content": message.content })],
        }
    }

    /// Convert tools to OpenAI function format
    fn tools_to_openai_format(tools: &[Arc<dyn Tool>]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.schema()
                    }
                })
            })
            .collect()
    }

    /// Parse OpenAI response into a Message
    fn parse_openai_response(response: &serde_json::Value) -> Result<Message, ModelError> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ModelError::InvalidResponse("No choices in OpenAI response".into()))?;

        let message = &choice["message"];
        let text = message["content"].as_str().unwrap_or_default().to_string();

        let mut calls = Vec::new();
        if let Some(tool_calls) = message["tool_calls"].as_array() {
            for tc in tool_calls {
                let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");
                calls.push(ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_string(),
                    name: tc["function"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    args: serde_json::from_str(args_str).unwrap_or(json!({})),
                });
            }
        }

        Ok(Message::tool_request(text, calls))
    }
}

#[async_trait]
impl Model for OpenAIModel {
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
        let url = format!("{}/chat/completions", self.base_url);

        let messages: Vec<serde_json::Value> =
            history.iter().flat_map(Self::to_openai_messages).collect();

        let mut body = json!({
            "model": model_id,
            "messages": messages
        });

        if let Some(temp) = config.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = config.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = config.top_p {
            body["top_p"] = json!(top_p);
        }
        if config.response_schema.is_some() && tools.is_empty() {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::tools_to_openai_format(tools));
            body["tool_choice"] = json!("auto");
        }

        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
        log::debug!("OpenAI response: {}", resp_json);

        Self::parse_openai_response(&resp_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::message::ToolResponse;

    #[test]
    fn test_user_and_system_messages() {
        let msgs = OpenAIModel::to_openai_messages(&Message::user("Hello"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "Hello");

        let msgs = OpenAIModel::to_openai_messages(&Message::system("You are helpful"));
        assert_eq!(msgs[0]["role"], "system");
    }

    #[test]
    fn test_assistant_with_tool_calls() {
        let msg = Message::tool_request(
            "",
            vec![ToolCall {
                id: "call_9".to_string(),
                name: "pubmed_search".to_string(),
                args: json!({"query": "IL6"}),
            }],
        );
        let msgs = OpenAIModel::to_openai_messages(&msg);
        assert_eq!(msgs[0]["role"], "assistant");
        assert!(msgs[0]["content"].is_null());
        assert_eq!(msgs[0]["tool_calls"][0]["id"], "call_9");
        assert_eq!(msgs[0]["tool_calls"][0]["function"]["name"], "pubmed_search");
    }

    #[test]
    fn test_tool_turn_fans_out() {
        let msg = Message::tool_results(vec![
            ToolResponse {
                call_id: "a".to_string(),
                name: "t".to_string(),
                content: json!(1),
            },
            ToolResponse {
                call_id: "b".to_string(),
                name: "t".to_string(),
                content: json!(2),
            },
        ]);
        let msgs = OpenAIModel::to_openai_messages(&msg);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["tool_call_id"], "b");
    }

    #[test]
    fn test_parse_tool_call_arguments() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "pubmed_search", "arguments": "{\"query\":\"EGFR\"}"}
                    }]
                }
            }]
        });

        let msg = OpenAIModel::parse_openai_response(&response).unwrap();
        assert_eq!(msg.content, "");
        assert_eq!(msg.tool_calls[0].name, "pubmed_search");
        assert_eq!(msg.tool_calls[0].args["query"], "EGFR");
    }

    #[test]
    fn test_parse_no_choices_is_error() {
        assert!(OpenAIModel::parse_openai_response(&json!({"choices": []})).is_err());
    }
}
