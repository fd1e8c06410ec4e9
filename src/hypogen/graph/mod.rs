// SPDX-License-Identifier: MIT

//! Workflow graphs
//!
//! - `types` - serde definitions of a pipeline (YAML)
//! - `selector` - conditional-edge selectors
//! - `compiled` - the validated `WorkflowGraph`

pub mod compiled;
pub mod selector;
pub mod types;

pub use compiled::{CompiledNode, GraphBuilder, NodeSpec, WorkflowGraph};
pub use selector::{Route, Selector, ACCEPT_TOKEN};
pub use types::{
    AgentDef, EdgeDef, ModelDef, NodeDef, PipelineDef, RouteDef, Targets, WaitMode, END, START,
};
