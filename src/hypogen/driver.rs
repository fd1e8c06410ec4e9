// SPDX-License-Identifier: MIT

//! Hypothesis driver
//!
//! Seeds the blackboard from a subgraph, runs the executor and turns the
//! terminal state into a `Hypothesis`. `run` never fails: every problem ends
//! up in `metadata.status` and the message trail.

use crate::hypogen::config::RunConfig;
use crate::hypogen::error::{ErrorKind, ExecutionError, HypogenError};
use crate::hypogen::executor::{ExecutionReport, Executor, TraceEvent};
use crate::hypogen::graph::WorkflowGraph;
use crate::hypogen::hypothesis::{Hypothesis, RunStatus};
use crate::hypogen::state::schema::{CONTEXT, GRAPH, PATH, SUBGRAPH};
use crate::hypogen::state::{Blackboard, Write};
use crate::hypogen::subgraph::Subgraph;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A finished run
#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub hypothesis: Hypothesis,
    pub trace: Vec<TraceEvent>,
}

pub struct HypothesisDriver {
    graph: Arc<WorkflowGraph>,
    config: RunConfig,
    cancel: CancellationToken,
    trace_tx: Option<mpsc::Sender<TraceEvent>>,
}

impl HypothesisDriver {
    pub fn new(graph: Arc<WorkflowGraph>, config: RunConfig) -> Self {
        Self {
            graph,
            config,
            cancel: CancellationToken::new(),
            trace_tx: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stream trace events of every run as they are recorded
    pub fn with_trace_sender(mut self, tx: mpsc::Sender<TraceEvent>) -> Self {
        self.trace_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Initial blackboard for a subgraph
    pub fn seed(&self, subgraph: &Subgraph) -> Result<Blackboard, HypogenError> {
        let mut state = Blackboard::new(self.graph.schema());
        state.apply(&Write::set(SUBGRAPH, serde_json::to_value(subgraph)?))?;
        state.apply(&Write::set(PATH, Value::String(subgraph.path_expression())))?;
        state.apply(&Write::set(GRAPH, Value::String(subgraph.graph_text())))?;
        if let Some(context) = subgraph.context.as_deref().filter(|c| !c.trim().is_empty()) {
            state.apply(&Write::set(CONTEXT, Value::String(context.to_string())))?;
        }
        Ok(state)
    }

    pub async fn run(&self, subgraph: &Subgraph) -> DriverOutcome {
        let started_at = Utc::now();

        if let Err(e) = subgraph.validate() {
            log::error!("Rejecting subgraph '{}': {}", subgraph.subgraph_id, e);
            return DriverOutcome {
                hypothesis: Hypothesis::aborted(subgraph, e.kind(), e.to_string()),
                trace: Vec::new(),
            };
        }
        let state = match self.seed(subgraph) {
            Ok(state) => state,
            Err(e) => {
                log::error!("Could not seed state: {}", e);
                return DriverOutcome {
                    hypothesis: Hypothesis::aborted(subgraph, e.kind(), e.to_string()),
                    trace: Vec::new(),
                };
            }
        };

        log::info!(
            "Generating hypothesis for '{}': {}",
            subgraph.subgraph_id,
            subgraph.path_expression()
        );
        let mut executor = Executor::new(self.graph.clone())
            .with_max_steps(self.config.max_steps)
            .with_cancellation(self.cancel.clone());
        if let Some(tx) = &self.trace_tx {
            executor = executor.with_trace_sender(tx.clone());
        }
        let report = executor.execute(state).await;

        let mut hypothesis = Hypothesis::from_state(&report.state, subgraph);
        let (status, kind, error) = classify(&report);
        let metadata = &mut hypothesis.metadata;
        metadata.status = status;
        metadata.error_kind = kind;
        metadata.error = error;
        metadata.steps = report.steps;
        metadata.started_at = started_at;
        metadata.finished_at = Utc::now();

        log::info!(
            "Run {} finished with status {} after {} iterations",
            metadata.run_id,
            metadata.status,
            metadata.iteration
        );
        DriverOutcome {
            hypothesis,
            trace: report.trace,
        }
    }

    /// Independent runs over the same subgraph, sharing the LLM adapters
    pub async fn run_many(&self, subgraph: &Subgraph, count: usize) -> Vec<DriverOutcome> {
        join_all((0..count.max(1)).map(|_| self.run(subgraph))).await
    }
}

/// Map an execution report to run status, error kind and reason
fn classify(report: &ExecutionReport) -> (RunStatus, Option<ErrorKind>, Option<String>) {
    match &report.error {
        Some(err @ ExecutionError::StepBudgetExceeded { .. }) => (
            RunStatus::Partial,
            Some(ErrorKind::BudgetExceeded),
            Some(err.to_string()),
        ),
        Some(err) => (
            RunStatus::Aborted,
            Some(ErrorKind::from(err)),
            Some(err.to_string()),
        ),
        None if !report.failed.is_empty() => (
            RunStatus::Partial,
            Some(ErrorKind::LlmFailure),
            Some(format!("Failed nodes: {}", report.failed.join(", "))),
        ),
        None if !report.short_circuited.is_empty() => (
            RunStatus::Partial,
            Some(ErrorKind::LlmFailure),
            Some(format!(
                "Skipped nodes: {}",
                report.short_circuited.join(", ")
            )),
        ),
        None => (RunStatus::Ok, None, None),
    }
}
