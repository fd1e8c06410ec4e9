// SPDX-License-Identifier: MIT

//! Pipeline definition types
//!
//! A pipeline is pure data: channels, nodes with inline agent definitions,
//! and edges. It is parsed from YAML and compiled into a `WorkflowGraph`.

use crate::hypogen::config::Settings;
use crate::hypogen::state::StateSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Entry pseudo-node
pub const START: &str = "__start__";
/// Terminal pseudo-node
pub const END: &str = "__end__";

/// Top-level pipeline definition
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PipelineDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Run settings overriding the defaults
    #[serde(default)]
    pub settings: Settings,
    /// Extra channels beyond the built-in hypothesis channels
    #[serde(default)]
    pub state: StateSchema,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// A node in the workflow graph
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeDef {
    /// Unique identifier for this node
    pub id: String,
    pub agent: AgentDef,
    /// Extra attempts after a failure; falls back to the run setting
    #[serde(default)]
    pub retries: Option<u32>,
    /// How to wait for static predecessors
    #[serde(default)]
    pub wait_for: WaitMode,
}

/// Inline agent definition
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AgentDef {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    /// Prompt template with `{channel}` placeholders
    pub prompt: String,
    #[serde(default)]
    pub model: ModelDef,
    /// Channels projected into the prompt; defaults to the placeholders
    #[serde(default)]
    pub reads: Vec<String>,
    /// Channel receiving the reply text
    #[serde(default)]
    pub output: Option<String>,
    /// Channel -> dot path into the structured reply
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// JSON schema for structured output
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Counter channel bumped once per successful run
    #[serde(default)]
    pub increments: Option<String>,
}

/// Model configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ModelDef {
    /// Optional; inferred from `MODEL_PROVIDER` or the model name prefix
    pub provider: Option<String>,
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One target or several
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Targets {
    Single(String),
    Multiple(Vec<String>),
}

impl Targets {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Targets::Single(s) => vec![s.clone()],
            Targets::Multiple(v) => v.clone(),
        }
    }
}

/// Edge definition
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeDef {
    /// Unconditional successors; several targets fan out
    Static { from: String, to: Targets },
    /// First matching route wins, else `default`
    Conditional {
        from: String,
        #[serde(default)]
        routes: Vec<RouteDef>,
        default: String,
    },
    /// Refinement gate bounded by the iteration counter
    Gate {
        from: String,
        accept: String,
        revise: String,
    },
}

impl EdgeDef {
    pub fn from(&self) -> &str {
        match self {
            EdgeDef::Static { from, .. }
            | EdgeDef::Conditional { from, .. }
            | EdgeDef::Gate { from, .. } => from,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteDef {
    pub when: String,
    pub to: String,
}

/// How to wait for static predecessors
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    /// Wait for every predecessor that can still arrive (default)
    #[default]
    All,
    /// Run on the first arrival
    Any,
}
