// SPDX-License-Identifier: MIT

//! Pipeline builder - turns a YAML pipeline into a validated `WorkflowGraph`
//!
//! Each node carries an inline agent definition. The builder resolves its
//! model, binds a tool subset from the registry, maps `output`/`outputs`
//! onto channels and wires edges into static successors or selectors.

use crate::adk::agent::template;
use crate::adk::agent::{Agent, BindMode, LlmAgent, LlmAgentConfig, OutputBinding};
use crate::adk::error::ModelError;
use crate::adk::llm::LlmAdapter;
use crate::adk::message::Message;
use crate::adk::model::{create_model, infer_provider_from_model, GenerationConfig, Model};
use crate::adk::tool::Tool;
use crate::adk::tool::ToolRegistry;
use crate::hypogen::config::RunConfig;
use crate::hypogen::error::{GraphError, HypogenError};
use crate::hypogen::graph::{
    AgentDef, EdgeDef, ModelDef, NodeDef, NodeSpec, PipelineDef, Selector, WorkflowGraph,
};
use crate::hypogen::state::{ChannelKind, StateSchema};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Pipeline shipped with the binary
pub const DEFAULT_PIPELINE: &str = include_str!("../../pipelines/hypothesis.yaml");

/// Model used when neither the pipeline nor `MODEL_NAME` names one
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

/// Parse a pipeline definition from YAML
pub fn parse_pipeline(yaml: &str) -> Result<PipelineDef, HypogenError> {
    let def: PipelineDef = serde_yaml::from_str(yaml)?;
    Ok(def)
}

/// Load a pipeline definition from a YAML file
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineDef, HypogenError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        HypogenError::InvalidInput(format!("cannot read pipeline {}: {}", path.display(), e))
    })?;
    parse_pipeline(&content)
}

pub fn default_pipeline() -> Result<PipelineDef, HypogenError> {
    parse_pipeline(DEFAULT_PIPELINE)
}

/// Provider and model name for an agent
///
/// Explicit definition > environment > inference from the model name.
pub fn resolve_model(
    def: &ModelDef,
    env_provider: Option<String>,
    env_model: Option<String>,
) -> (String, String) {
    let model_name = def
        .model_name
        .clone()
        .or(env_model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let provider = def
        .provider
        .clone()
        .or(env_provider)
        .unwrap_or_else(|| infer_provider_from_model(&model_name));
    (provider, model_name)
}

/// Builds workflow graphs from pipeline definitions
pub struct PipelineBuilder {
    registry: ToolRegistry,
    config: RunConfig,
    model_override: Option<Arc<dyn Model>>,
    permits: Arc<Semaphore>,
}

/// Adapters created during one build, keyed by provider
type AdapterCache = BTreeMap<String, Arc<LlmAdapter>>;

impl PipelineBuilder {
    pub fn new(registry: ToolRegistry, config: RunConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.adapter.max_concurrent.max(1)));
        Self {
            registry,
            config,
            model_override: None,
            permits,
        }
    }

    /// Route every agent through one model regardless of its definition
    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model_override = Some(model);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Compile a pipeline into a validated graph
    pub fn build(&self, def: &PipelineDef) -> Result<WorkflowGraph, HypogenError> {
        let mut schema = StateSchema::hypothesis();
        schema.extend(def.state.clone());

        let mut adapters = AdapterCache::new();
        let mut builder = WorkflowGraph::builder(def.name.clone(), schema.clone());
        for node in &def.nodes {
            let agent = self.build_agent(node, &schema, &mut adapters)?;
            let retries = node.retries.unwrap_or(self.config.node_retries);
            builder = builder.node(NodeSpec::new(agent).retries(retries).wait_for(node.wait_for));
        }

        for edge in &def.edges {
            builder = match edge {
                EdgeDef::Static { from, to } => to
                    .to_vec()
                    .iter()
                    .fold(builder, |b, target| b.edge(from, target)),
                EdgeDef::Conditional {
                    from,
                    routes,
                    default,
                } => {
                    let selector = Selector::routes(routes, default).map_err(|source| {
                        GraphError::Condition {
                            from: from.clone(),
                            source,
                        }
                    })?;
                    builder.conditional(from, selector)
                }
                EdgeDef::Gate {
                    from,
                    accept,
                    revise,
                } => builder.conditional(
                    from,
                    Selector::gate(accept, revise, self.config.max_iterations),
                ),
            };
        }

        let graph = builder.build()?;
        log::info!(
            "Built pipeline '{}' with {} nodes and {} edges",
            def.name,
            def.nodes.len(),
            def.edges.len()
        );
        Ok(graph)
    }

    fn build_agent(
        &self,
        node: &NodeDef,
        schema: &StateSchema,
        adapters: &mut AdapterCache,
    ) -> Result<Arc<dyn Agent>, HypogenError> {
        let def = &node.agent;
        let (provider, model_id) = resolve_model(
            &def.model,
            env::var("MODEL_PROVIDER").ok(),
            env::var("MODEL_NAME").ok(),
        );
        let adapter = self.adapter(&provider, adapters)?;
        let tools = self.registry.subset(&def.tools).map_err(|name| GraphError::Agent {
            node: node.id.clone(),
            message: format!("unknown tool '{}'", name),
        })?;

        log::debug!(
            "Agent '{}' uses {} via {} with {} tools",
            node.id,
            model_id,
            adapter.provider(),
            tools.len()
        );
        let config = agent_config(&node.id, def, model_id, schema);
        Ok(Arc::new(LlmAgent::new(config, adapter, tools)))
    }

    /// One adapter per provider, all sharing the concurrency limit
    fn adapter(
        &self,
        provider: &str,
        adapters: &mut AdapterCache,
    ) -> Result<Arc<LlmAdapter>, HypogenError> {
        let key = match &self.model_override {
            Some(_) => String::new(),
            None => provider.to_lowercase(),
        };
        if let Some(adapter) = adapters.get(&key) {
            return Ok(adapter.clone());
        }

        let model = match &self.model_override {
            Some(model) => model.clone(),
            None => create_model(provider)?,
        };
        let adapter = Arc::new(LlmAdapter::with_permits(
            model,
            self.config.adapter.clone(),
            self.permits.clone(),
        ));
        adapters.insert(key, adapter.clone());
        Ok(adapter)
    }
}

/// Stands in for every provider when a pipeline is checked but never run
struct OfflineModel;

#[async_trait]
impl Model for OfflineModel {
    fn provider(&self) -> &str {
        "offline"
    }

    async fn generate_content(
        &self,
        _model_id: &str,
        _history: &[Message],
        _config: &GenerationConfig,
        _tools: &[Arc<dyn Tool>],
    ) -> Result<Message, ModelError> {
        Err(ModelError::InvalidResponse(
            "pipeline was built for validation only".to_string(),
        ))
    }
}

/// Compile a pipeline without provider credentials
pub fn validate_pipeline(
    def: &PipelineDef,
    registry: ToolRegistry,
    config: RunConfig,
) -> Result<WorkflowGraph, HypogenError> {
    PipelineBuilder::new(registry, config)
        .with_model(Arc::new(OfflineModel))
        .build(def)
}

/// Immutable agent configuration for a node
fn agent_config(
    id: &str,
    def: &AgentDef,
    model_id: String,
    schema: &StateSchema,
) -> LlmAgentConfig {
    let reads = if def.reads.is_empty() {
        template::placeholders(&def.prompt)
    } else {
        def.reads.clone()
    };

    let mut bindings: Vec<OutputBinding> = def.output.iter().map(OutputBinding::text).collect();
    for (channel, path) in &def.outputs {
        let mode = match schema.kind(channel) {
            Some(ChannelKind::Append) => BindMode::Append,
            _ => BindMode::Set,
        };
        bindings.push(OutputBinding::field(channel, path, mode));
    }

    LlmAgentConfig {
        name: id.to_string(),
        instructions: def.instructions.clone(),
        prompt: def.prompt.clone(),
        model_id,
        reads,
        bindings,
        increments: def.increments.clone(),
        generation: GenerationConfig {
            temperature: def.model.temperature,
            max_output_tokens: def.model.max_tokens,
            top_p: None,
            response_schema: def.output_schema.clone(),
        },
    }
}
