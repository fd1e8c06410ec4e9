// SPDX-License-Identifier: MIT

//! LLM adapter
//!
//! Wraps a provider [`Model`] with everything a single agent call needs:
//! - a shared semaphore bounding concurrent requests
//! - per-call timeouts
//! - transient-error retries with exponential backoff and jitter
//! - a tool-use react loop bounded by `max_tool_steps`
//! - a structured-output repair loop bounded by `structured_retries`

use crate::adk::error::{LlmError, ModelError};
use crate::adk::message::{Message, Role, ToolResponse};
use crate::adk::model::{GenerationConfig, Model};
use crate::adk::schema;
use crate::adk::tool::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Name carried by repair instructions in the message trail
pub const REPAIR_MESSAGE_NAME: &str = "repair";

/// Limits applied by the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub max_tool_steps: u32,
    pub structured_retries: u32,
    pub transient_retries: u32,
    pub max_concurrent: usize,
    pub llm_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_tool_steps: 10,
            structured_retries: 3,
            transient_retries: 5,
            max_concurrent: 8,
            llm_timeout_secs: 120,
            tool_timeout_secs: 60,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Per-call options
#[derive(Clone, Default)]
pub struct InvokeOptions {
    pub generation: GenerationConfig,
    pub tools: Vec<Arc<dyn Tool>>,
}

/// Result of one adapter invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Final assistant message
    pub message: Message,
    /// Schema-valid record, present when a response schema was requested
    pub parsed: Option<Value>,
    /// Every message produced during the call, in order
    pub trail: Vec<Message>,
}

pub struct LlmAdapter {
    model: Arc<dyn Model>,
    config: AdapterConfig,
    permits: Arc<Semaphore>,
}

impl LlmAdapter {
    pub fn new(model: Arc<dyn Model>, config: AdapterConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self::with_permits(model, config, permits)
    }

    /// Share one concurrency limit across adapters for different providers
    pub fn with_permits(
        model: Arc<dyn Model>,
        config: AdapterConfig,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            model,
            config,
            permits,
        }
    }

    pub fn provider(&self) -> &str {
        self.model.provider()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Stop handing out permits; pending and future calls fail with `Cancelled`
    pub fn close(&self) {
        self.permits.close();
    }

    pub async fn invoke(
        &self,
        messages: &[Message],
        model_id: &str,
        options: &InvokeOptions,
    ) -> Result<Invocation, LlmError> {
        let mut history = messages.to_vec();
        if let Some(schema) = &options.generation.response_schema {
            history.push(Message::system(format!(
                "Respond with a single JSON object matching this schema:\n{}",
                serde_json::to_string_pretty(schema).unwrap_or_default()
            )));
        }
        let mut trail = Vec::new();

        let reply = if options.tools.is_empty() {
            let reply = self
                .generate(model_id, &history, &options.generation, &[])
                .await?;
            history.push(reply.clone());
            trail.push(reply.clone());
            reply
        } else {
            self.react_loop(model_id, &mut history, &mut trail, options)
                .await?
        };

        match &options.generation.response_schema {
            None => Ok(Invocation {
                message: reply,
                parsed: None,
                trail,
            }),
            Some(schema) => {
                self.repair_loop(model_id, reply, schema, &mut history, &mut trail, options)
                    .await
                    .map(|(message, parsed)| Invocation {
                        message,
                        parsed: Some(parsed),
                        trail,
                    })
            }
        }
    }

    /// Alternate assistant turns and tool results until a plain answer arrives
    async fn react_loop(
        &self,
        model_id: &str,
        history: &mut Vec<Message>,
        trail: &mut Vec<Message>,
        options: &InvokeOptions,
    ) -> Result<Message, LlmError> {
        let max_steps = self.config.max_tool_steps;
        for step in 0..max_steps {
            log::debug!("React step {}/{} on {}", step + 1, max_steps, model_id);
            let reply = self
                .generate(model_id, history, &options.generation, &options.tools)
                .await?;
            history.push(reply.clone());
            trail.push(reply.clone());

            if !reply.has_tool_calls() {
                return Ok(reply);
            }

            let mut responses = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                log::info!("Tool call: {} {}", call.name, call.args);
                let content = self
                    .execute_tool(&options.tools, &call.name, call.args.clone())
                    .await?;
                responses.push(ToolResponse {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content,
                });
            }

            let tool_turn = Message::tool_results(responses);
            history.push(tool_turn.clone());
            trail.push(tool_turn);
        }

        log::error!("Tool loop reached {} steps without an answer", max_steps);
        Err(LlmError::ToolLoopExhausted { steps: max_steps })
    }

    /// Run one tool; failures become an error payload the model can read
    async fn execute_tool(
        &self,
        tools: &[Arc<dyn Tool>],
        name: &str,
        args: Value,
    ) -> Result<Value, LlmError> {
        let Some(tool) = tools.iter().find(|t| t.name() == name) else {
            log::error!("Tool {} not found", name);
            return Ok(serde_json::json!({ "error": format!("Tool {} not found", name) }));
        };

        let secs = self.config.tool_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), tool.execute(args)).await {
            Err(_) => Err(LlmError::ToolTimeout {
                tool: name.to_string(),
                secs,
            }),
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                log::error!("Tool {} failed: {}", name, e);
                Ok(serde_json::json!({ "error": e.to_string() }))
            }
        }
    }

    /// Re-ask until the reply validates against `schema`
    async fn repair_loop(
        &self,
        model_id: &str,
        first: Message,
        schema: &Value,
        history: &mut Vec<Message>,
        trail: &mut Vec<Message>,
        options: &InvokeOptions,
    ) -> Result<(Message, Value), LlmError> {
        let mut reply = first;
        let mut attempt = 0;
        loop {
            let reason = match schema::extract_json(&reply.content) {
                None => "reply contained no JSON object".to_string(),
                Some(value) => match schema::validate(&value, schema) {
                    Ok(()) => return Ok((reply, value)),
                    Err(reason) => reason,
                },
            };

            if attempt >= self.config.structured_retries {
                return Err(LlmError::StructuredOutput {
                    attempts: attempt + 1,
                    reason,
                });
            }
            attempt += 1;
            log::warn!(
                "Structured output invalid ({}), repair attempt {}/{}",
                reason,
                attempt,
                self.config.structured_retries
            );

            let repair = Message::new(
                Role::User,
                format!(
                    "Your previous reply did not match the required JSON schema: {}. \
                     Reply again with only the corrected JSON object.",
                    reason
                ),
            )
            .with_name(REPAIR_MESSAGE_NAME);
            history.push(repair.clone());
            trail.push(repair);

            reply = self
                .generate(model_id, history, &options.generation, &[])
                .await?;
            history.push(reply.clone());
            trail.push(reply.clone());
        }
    }

    /// One model request with permit, timeout and transient retries
    async fn generate(
        &self,
        model_id: &str,
        history: &[Message],
        config: &GenerationConfig,
        tools: &[Arc<dyn Tool>],
    ) -> Result<Message, LlmError> {
        let secs = self.config.llm_timeout_secs;
        let max_retries = self.config.transient_retries;
        let mut attempt = 0;

        loop {
            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| LlmError::Cancelled)?;
                tokio::time::timeout(
                    Duration::from_secs(secs),
                    self.model.generate_content(model_id, history, config, tools),
                )
                .await
            };

            match result {
                Err(_) => return Err(LlmError::Timeout { secs }),
                Ok(Ok(message)) => return Ok(message),
                Ok(Err(e)) if e.is_transient() && attempt < max_retries => {
                    let backoff = self.backoff(attempt, &e);
                    log::warn!(
                        "Retrying {} request (attempt {}/{}) in {}ms: {}",
                        self.model.provider(),
                        attempt + 1,
                        max_retries,
                        backoff.as_millis(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Ok(Err(e)) => {
                    log::error!("{} request failed: {}", self.model.provider(), e);
                    return Err(LlmError::from_model(self.model.provider(), &e));
                }
            }
        }
    }

    fn backoff(&self, attempt: u32, err: &ModelError) -> Duration {
        if let ModelError::RateLimited {
            retry_after_secs: Some(secs),
        } = err
        {
            return Duration::from_secs(*secs)
                .min(Duration::from_millis(self.config.backoff_max_ms));
        }
        let ms = self
            .config
            .backoff_initial_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.config.backoff_max_ms);
        // Jitter: 0.8x to 1.2x
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((ms as f64 * jitter) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::ToolError;
    use crate::adk::message::ToolCall;
    use async_trait::async_trait;
    use once_cell::sync::Lazy;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Model that replays scripted results, then answers "done"
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<Message, ModelError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<Message, ModelError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Model for ScriptedModel {
        fn provider(&self) -> &str {
            "scripted"
        }

        async fn generate_content(
            &self,
            _model_id: &str,
            _history: &[Message],
            _config: &GenerationConfig,
            _tools: &[Arc<dyn Tool>],
        ) -> Result<Message, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Message::assistant("done")))
        }
    }

    /// Model that always requests another tool call
    struct LoopingModel;

    #[async_trait]
    impl Model for LoopingModel {
        fn provider(&self) -> &str {
            "looping"
        }

        async fn generate_content(
            &self,
            _model_id: &str,
            _history: &[Message],
            _config: &GenerationConfig,
            _tools: &[Arc<dyn Tool>],
        ) -> Result<Message, ModelError> {
            Ok(tool_call("flaky", json!({})))
        }
    }

    static EMPTY_SCHEMA: Lazy<Value> = Lazy::new(|| json!({"type": "object"}));

    struct FlakyTool;

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn schema(&self) -> &Value {
            &EMPTY_SCHEMA
        }
        async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
            Err(ToolError::failed("flaky", "service unavailable"))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn schema(&self) -> &Value {
            &EMPTY_SCHEMA
        }
        async fn execute(&self, input: Value) -> Result<Value, ToolError> {
            Ok(json!({ "echo": input }))
        }
    }

    fn tool_call(name: &str, args: Value) -> Message {
        Message::tool_request(
            "",
            vec![ToolCall {
                id: format!("call_{}", name),
                name: name.to_string(),
                args,
            }],
        )
    }

    fn fast_config() -> AdapterConfig {
        AdapterConfig {
            backoff_initial_ms: 1,
            backoff_max_ms: 2,
            ..AdapterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_plain_invocation() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(Message::assistant("hello"))]));
        let adapter = LlmAdapter::new(model, fast_config());

        let out = adapter
            .invoke(&[Message::user("hi")], "m", &InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(out.message.content, "hello");
        assert!(out.parsed.is_none());
        assert_eq!(out.trail.len(), 1);
    }

    #[tokio::test]
    async fn test_react_loop_runs_tools() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call("echo", json!({"q": "x"}))),
            Ok(Message::assistant("answer")),
        ]));
        let adapter = LlmAdapter::new(model, fast_config());
        let options = InvokeOptions {
            tools: vec![Arc::new(EchoTool)],
            ..InvokeOptions::default()
        };

        let out = adapter
            .invoke(&[Message::user("go")], "m", &options)
            .await
            .unwrap();
        assert_eq!(out.message.content, "answer");
        // assistant(tool call), tool results, assistant(answer)
        assert_eq!(out.trail.len(), 3);
        assert_eq!(out.trail[1].role, Role::Tool);
        assert_eq!(out.trail[1].tool_responses[0].content["echo"]["q"], "x");
    }

    #[tokio::test]
    async fn test_tool_loop_exhaustion() {
        let adapter = LlmAdapter::new(
            Arc::new(LoopingModel),
            AdapterConfig {
                max_tool_steps: 4,
                ..fast_config()
            },
        );
        let options = InvokeOptions {
            tools: vec![Arc::new(FlakyTool)],
            ..InvokeOptions::default()
        };

        let err = adapter
            .invoke(&[Message::user("go")], "m", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ToolLoopExhausted { steps: 4 }));
    }

    #[tokio::test]
    async fn test_structured_output_repair() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(Message::assistant("not json at all")),
            Ok(Message::assistant(r#"{"verdict": 7}"#)),
            Ok(Message::assistant(r#"{"verdict": "ACCEPT"}"#)),
        ]));
        let adapter = LlmAdapter::new(model.clone(), fast_config());
        let options = InvokeOptions {
            generation: GenerationConfig {
                response_schema: Some(json!({
                    "type": "object",
                    "required": ["verdict"],
                    "properties": {"verdict": {"type": "string"}}
                })),
                ..GenerationConfig::default()
            },
            ..InvokeOptions::default()
        };

        let out = adapter
            .invoke(&[Message::user("judge")], "m", &options)
            .await
            .unwrap();
        assert_eq!(out.parsed, Some(json!({"verdict": "ACCEPT"})));
        let repairs = out
            .trail
            .iter()
            .filter(|m| m.name.as_deref() == Some(REPAIR_MESSAGE_NAME))
            .count();
        assert_eq!(repairs, 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_structured_output_gives_up() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(Message::assistant("nope")),
            Ok(Message::assistant("nope")),
        ]));
        let adapter = LlmAdapter::new(
            model,
            AdapterConfig {
                structured_retries: 1,
                ..fast_config()
            },
        );
        let options = InvokeOptions {
            generation: GenerationConfig {
                response_schema: Some(json!({"type": "object"})),
                ..GenerationConfig::default()
            },
            ..InvokeOptions::default()
        };

        let err = adapter
            .invoke(&[Message::user("judge")], "m", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::StructuredOutput { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(ModelError::RateLimited {
                retry_after_secs: None,
            }),
            Err(ModelError::Transport("reset".to_string())),
            Ok(Message::assistant("finally")),
        ]));
        let adapter = LlmAdapter::new(model.clone(), fast_config());

        let out = adapter
            .invoke(&[Message::user("hi")], "m", &InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(out.message.content, "finally");
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_retries_exhaust_to_permanent() {
        let script = (0..3)
            .map(|_| {
                Err(ModelError::Http {
                    provider: "scripted".to_string(),
                    status: 503,
                    body: "overloaded".to_string(),
                })
            })
            .collect();
        let adapter = LlmAdapter::new(
            Arc::new(ScriptedModel::new(script)),
            AdapterConfig {
                transient_retries: 2,
                ..fast_config()
            },
        );

        let err = adapter
            .invoke(&[Message::user("hi")], "m", &InvokeOptions::default())
            .await
            .unwrap_err();
        match err {
            LlmError::Permanent { code, .. } => assert_eq!(code, "503"),
            other => panic!("expected permanent error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::Http {
            provider: "scripted".to_string(),
            status: 401,
            body: "bad key".to_string(),
        })]));
        let adapter = LlmAdapter::new(model.clone(), fast_config());

        assert!(adapter
            .invoke(&[Message::user("hi")], "m", &InvokeOptions::default())
            .await
            .is_err());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_adapter_cancels() {
        let adapter = LlmAdapter::new(Arc::new(LoopingModel), fast_config());
        adapter.close();
        let err = adapter
            .invoke(&[Message::user("hi")], "m", &InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }
}
