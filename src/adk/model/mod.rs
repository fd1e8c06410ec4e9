// SPDX-License-Identifier: MIT

//! Model module - defines the provider model trait and implementations
//!
//! A `Model` is one provider endpoint. It performs exactly one request per
//! call; retries, timeouts, structured output and tool loops live in
//! [`crate::adk::llm::LlmAdapter`].
//! - [anthropic] - Anthropic's Messages API
//! - [openai] - OpenAI's Chat Completions API

pub mod anthropic;
pub mod openai;

use crate::adk::error::ModelError;
use crate::adk::message::Message;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    /// JSON schema the reply must satisfy; providers with a native JSON mode use it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

/// Core trait for LLM provider implementations
#[async_trait]
pub trait Model: Send + Sync {
    /// Provider name used in logs and escalated errors
    fn provider(&self) -> &str;

    async fn generate_content(
        &self,
        model_id: &str,
        history: &[Message],
        config: &GenerationConfig,
        tools: &[Arc<dyn Tool>],
    ) -> Result<Message, ModelError>;
}

/// Build a provider model by name
pub fn create_model(provider: &str) -> Result<Arc<dyn Model>, ModelError> {
    match provider.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(openai::OpenAIModel::new()?)),
        "anthropic" | "" => Ok(Arc::new(anthropic::AnthropicModel::new()?)),
        other => Err(ModelError::InvalidResponse(format!(
            "Unknown model provider: {}",
            other
        ))),
    }
}

/// Infer the provider from the model name prefix
pub fn infer_provider_from_model(model_name: &str) -> String {
    let name_lower = model_name.to_lowercase();
    if name_lower.starts_with("gpt") || name_lower.starts_with("o1") || name_lower.starts_with("o3")
    {
        "OpenAI".to_string()
    } else {
        // Claude models and anything unrecognised go to Anthropic
        "Anthropic".to_string()
    }
}

/// Retry-After header in whole seconds, if the provider sent one
pub(crate) fn retry_after(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_provider_openai() {
        assert_eq!(infer_provider_from_model("gpt-4o"), "OpenAI");
        assert_eq!(infer_provider_from_model("GPT-4"), "OpenAI");
        assert_eq!(infer_provider_from_model("o1-mini"), "OpenAI");
    }

    #[test]
    fn test_infer_provider_anthropic() {
        assert_eq!(infer_provider_from_model("claude-3-5-sonnet"), "Anthropic");
        assert_eq!(infer_provider_from_model("Claude-3-Opus"), "Anthropic");
    }

    #[test]
    fn test_infer_provider_unknown_defaults_to_anthropic() {
        assert_eq!(infer_provider_from_model("my-custom-model"), "Anthropic");
        assert_eq!(infer_provider_from_model(""), "Anthropic");
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(create_model("gemini-nope").is_err());
    }
}
