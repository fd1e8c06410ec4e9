// SPDX-License-Identifier: MIT

//! Typed error handling for the agent development kit
//!
//! Each layer gets its own thiserror enum: provider models, tools, the
//! LLM adapter that wraps both, and agents that consume the adapter.

use thiserror::Error;

/// Provider-side model errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Non-success HTTP status from the provider
    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// Connection-level failure before a status was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Rate limits, 5xx and transport failures are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::RateLimited { .. } | ModelError::Transport(_) => true,
            ModelError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Provider code used when the error escalates
    pub fn code(&self) -> String {
        match self {
            ModelError::ApiKeyMissing(_) => "auth".to_string(),
            ModelError::RateLimited { .. } => "429".to_string(),
            ModelError::Http { status, .. } => status.to_string(),
            ModelError::Transport(_) => "transport".to_string(),
            ModelError::InvalidResponse(_) => "invalid_response".to_string(),
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ModelError::Http {
                provider: "http".to_string(),
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => ModelError::Transport(err.to_string()),
        }
    }
}

/// Errors raised by tools at the external-service boundary
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match the tool's input schema
    #[error("Invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    /// The tool ran but the external service reported a failure
    #[error("Tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// URL construction errors
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the LLM adapter after its own retries
#[derive(Debug, Error)]
pub enum LlmError {
    /// Permanent provider failure, or transient failures that exhausted retries
    #[error("LLM error from {provider} ({code}): {message}")]
    Permanent {
        provider: String,
        code: String,
        message: String,
    },

    /// Output never matched the response schema
    #[error("Structured output invalid after {attempts} attempts: {reason}")]
    StructuredOutput { attempts: u32, reason: String },

    /// The model kept requesting tools
    #[error("Tool loop exhausted after {steps} steps")]
    ToolLoopExhausted { steps: u32 },

    /// Model call exceeded its timeout
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Tool call exceeded its timeout
    #[error("Tool '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// The run was cancelled while the call was in flight
    #[error("LLM call cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn from_model(provider: &str, err: &ModelError) -> Self {
        Self::Permanent {
            provider: provider.to_string(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Errors an agent invocation can end with
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The prompt referenced a channel absent from the projection
    #[error("Missing input channel '{channel}'")]
    MissingInput { channel: String },

    /// The agent produced a write for a channel it never declared
    #[error("Agent '{agent}' wrote undeclared channel '{channel}'")]
    UndeclaredWrite { agent: String, channel: String },

    /// The agent output could not be mapped onto its channels
    #[error("Invalid agent output: {0}")]
    InvalidOutput(String),
}

impl AgentError {
    /// True when the failure originated at the model boundary
    pub fn is_llm(&self) -> bool {
        matches!(self, AgentError::Llm(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ModelError::RateLimited {
            retry_after_secs: Some(2)
        }
        .is_transient());
        assert!(ModelError::Transport("reset".to_string()).is_transient());
        assert!(ModelError::Http {
            provider: "openai".to_string(),
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!ModelError::Http {
            provider: "openai".to_string(),
            status: 401,
            body: String::new()
        }
        .is_transient());
        assert!(!ModelError::ApiKeyMissing("Anthropic".to_string()).is_transient());
    }

    #[test]
    fn test_permanent_carries_provider_code() {
        let err = ModelError::Http {
            provider: "anthropic".to_string(),
            status: 403,
            body: "quota".to_string(),
        };
        let llm = LlmError::from_model("anthropic", &err);
        let text = llm.to_string();
        assert!(text.contains("anthropic"));
        assert!(text.contains("403"));
    }

    #[test]
    fn test_agent_error_from_llm() {
        let err: AgentError = LlmError::ToolLoopExhausted { steps: 4 }.into();
        assert!(err.is_llm());
        assert!(err.to_string().contains("4 steps"));
    }
}
