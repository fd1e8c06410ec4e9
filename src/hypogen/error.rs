// SPDX-License-Identifier: MIT

//! Typed error handling for the hypothesis pipeline
//!
//! `HypogenError` is the top-level type; `ErrorKind` is the coarse
//! classification the CLI turns into exit codes.

use crate::adk::error::{AgentError, LlmError, ModelError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Blackboard merge errors
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("Channel '{channel}' is {kind:?}, cannot apply {op}")]
    KindMismatch {
        channel: String,
        kind: crate::hypogen::state::ChannelKind,
        op: &'static str,
    },

    #[error("Channel '{channel}' expects {expected:?}, got {value}")]
    TypeMismatch {
        channel: String,
        expected: crate::hypogen::state::FieldType,
        value: String,
    },
}

/// Condition expression parse errors
#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("Could not parse condition: {0}")]
    Syntax(String),

    #[error("Could not parse literal: {0}")]
    Literal(String),
}

/// Workflow graph construction diagnostics
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Duplicate node '{0}'")]
    DuplicateNode(String),

    #[error("Edge from '{from}' references unknown node '{node}'")]
    UnknownNode { from: String, node: String },

    #[error("Workflow has no entry edge from START")]
    NoEntry,

    #[error("Node '{0}' is unreachable from START")]
    Unreachable(String),

    #[error("Node '{0}' cannot reach a sink")]
    NoPathToSink(String),

    #[error("Cycle without a bounded gate through {0:?}")]
    UnboundedCycle(Vec<String>),

    #[error("Scalar channel '{channel}' has concurrent writers '{first}' and '{second}'")]
    ScalarConflict {
        channel: String,
        first: String,
        second: String,
    },

    #[error("Node '{node}' uses unknown channel '{channel}'")]
    UnknownChannel { node: String, channel: String },

    #[error("Node '{node}' writes reserved channel '{channel}'")]
    ReservedChannel { node: String, channel: String },

    #[error("Node '{node}' has more than one conditional edge")]
    MultipleSelectors { node: String },

    #[error("Invalid condition on edge from '{from}': {source}")]
    Condition {
        from: String,
        #[source]
        source: ConditionError,
    },

    #[error("Agent for node '{node}': {message}")]
    Agent { node: String, message: String },
}

/// Fatal executor policy errors
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("Step budget of {limit} invocations exceeded")]
    StepBudgetExceeded { limit: u32 },

    #[error("Conflicting writes to scalar channel '{channel}' from {nodes:?}")]
    ConflictingWrites { channel: String, nodes: Vec<String> },

    #[error("Run cancelled")]
    Cancelled,
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    BudgetExceeded,
    LlmFailure,
    Policy,
    Cancelled,
}

impl ErrorKind {
    /// Process exit code for this kind of failure
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::InvalidInput => 1,
            ErrorKind::BudgetExceeded => 2,
            ErrorKind::LlmFailure | ErrorKind::Policy | ErrorKind::Cancelled => 3,
        }
    }
}

impl From<&ExecutionError> for ErrorKind {
    fn from(err: &ExecutionError) -> Self {
        match err {
            ExecutionError::StepBudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            ExecutionError::Cancelled => ErrorKind::Cancelled,
            ExecutionError::ConflictingWrites { .. } => ErrorKind::Policy,
        }
    }
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum HypogenError {
    /// Malformed subgraph or pipeline input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors (missing env vars, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl HypogenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HypogenError::InvalidInput(_)
            | HypogenError::Config(_)
            | HypogenError::Graph(_)
            | HypogenError::State(_)
            | HypogenError::Io(_)
            | HypogenError::Json(_)
            | HypogenError::Yaml(_) => ErrorKind::InvalidInput,
            HypogenError::Execution(e) => ErrorKind::from(e),
            HypogenError::Agent(_) | HypogenError::Llm(_) | HypogenError::Model(_) => {
                ErrorKind::LlmFailure
            }
        }
    }
}
