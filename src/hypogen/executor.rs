// SPDX-License-Identifier: MIT

//! Workflow executor
//!
//! Runs a `WorkflowGraph` in rounds. Every node runnable in a round is
//! started on the same blackboard snapshot and awaited together; their
//! partial updates are then merged one by one in topological order (ties by
//! node name) before any conditional edge is evaluated. The executor is the
//! only writer of the blackboard.
//!
//! Fan-in is a barrier: a node waits for each predecessor, static or routed,
//! that can still arrive. A failed predecessor short-circuits the barrier.
//! Retries draw on the same step budget as first attempts.

use crate::adk::agent::{AgentInput, StateUpdate, Write};
use crate::adk::error::{AgentError, LlmError};
use crate::adk::message::Message;
use crate::hypogen::error::ExecutionError;
use crate::hypogen::graph::{CompiledNode, WaitMode, WorkflowGraph, END, START};
use crate::hypogen::state::schema::FAILED_BRANCH;
use crate::hypogen::state::Blackboard;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default global invocation budget
pub const DEFAULT_MAX_STEPS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    ShortCircuited,
}

/// One executor-observed event, written as a line of `traces.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: DateTime<Utc>,
    /// Scheduling round
    pub round: u32,
    pub node: String,
    pub status: NodeStatus,
    /// Channels written by the merged update
    #[serde(default)]
    pub channel_updates: Vec<String>,
    /// Indices into the message log of the messages this event appended
    #[serde(default)]
    pub message_refs: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal state of a run plus what happened on the way
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub state: Blackboard,
    /// Agent invocations, retries included
    pub steps: u32,
    pub visits: BTreeMap<String, u32>,
    /// Nodes that failed after their retries, in failure order
    pub failed: Vec<String>,
    /// Nodes skipped because an upstream branch failed
    pub short_circuited: Vec<String>,
    pub trace: Vec<TraceEvent>,
    /// Policy error that stopped the run
    pub error: Option<ExecutionError>,
}

impl ExecutionReport {
    /// No policy error and no failed branch
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.failed.is_empty() && self.short_circuited.is_empty()
    }

    pub fn visits(&self, node: &str) -> u32 {
        self.visits.get(node).copied().unwrap_or(0)
    }
}

/// Arrivals collected for a node waiting at a barrier
#[derive(Debug, Default)]
struct Pending {
    arrived: BTreeSet<String>,
    failed: BTreeSet<String>,
}

/// Outcome of a node after retries
struct NodeRun {
    id: String,
    attempts: u32,
    /// A retry was refused because the step budget ran out
    out_of_budget: bool,
    result: Result<StateUpdate, AgentError>,
}

enum Release {
    Run,
    ShortCircuit(Vec<String>),
}

pub struct Executor {
    graph: Arc<WorkflowGraph>,
    max_steps: u32,
    cancel: CancellationToken,
    trace_tx: Option<mpsc::Sender<TraceEvent>>,
}

impl Executor {
    pub fn new(graph: Arc<WorkflowGraph>) -> Self {
        Self {
            graph,
            max_steps: DEFAULT_MAX_STEPS,
            cancel: CancellationToken::new(),
            trace_tx: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stream trace events as they are recorded
    pub fn with_trace_sender(mut self, tx: mpsc::Sender<TraceEvent>) -> Self {
        self.trace_tx = Some(tx);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Run to a terminal state. Never fails: policy errors are recorded on
    /// the report next to whatever state was reached.
    pub async fn execute(&self, state: Blackboard) -> ExecutionReport {
        let mut report = ExecutionReport {
            state,
            steps: 0,
            visits: BTreeMap::new(),
            failed: Vec::new(),
            short_circuited: Vec::new(),
            trace: Vec::new(),
            error: None,
        };
        let mut pending: BTreeMap<String, Pending> = BTreeMap::new();
        let mut frontier: Vec<String> = Vec::new();
        let mut round = 0u32;

        log::info!("Executing workflow '{}'", self.graph.name());
        self.route(START, false, &report.state, &mut pending);

        loop {
            self.release(round, &mut frontier, &mut pending, &mut report)
                .await;
            if frontier.is_empty() {
                break;
            }

            if self.cancel.is_cancelled() {
                log::warn!("Workflow '{}' cancelled", self.graph.name());
                report.error = Some(ExecutionError::Cancelled);
                break;
            }

            let batch = self.order(std::mem::take(&mut frontier));
            if report.steps + batch.len() as u32 > self.max_steps {
                self.budget_exhausted(&mut report);
                break;
            }
            // First attempts are reserved above; retries share what is left
            let spare = AtomicU32::new(self.max_steps - report.steps - batch.len() as u32);

            round += 1;
            log::info!("Round {}: running {:?}", round, batch);

            let runs = batch.iter().filter_map(|id| {
                let node = self.graph.node(id)?;
                let input = report.state.project(node.agent.reads());
                Some(self.run_node(node, input, &spare))
            });
            let results = tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::warn!("Workflow '{}' cancelled mid-round", self.graph.name());
                    report.error = Some(ExecutionError::Cancelled);
                    break;
                }
                results = join_all(runs) => results,
            };

            let mut out_of_budget = false;
            for run in &results {
                report.steps += run.attempts;
                out_of_budget |= run.out_of_budget;
                *report.visits.entry(run.id.clone()).or_default() += 1;
            }

            if let Some(err) = self.conflicting_writes(&results) {
                log::error!("{}", err);
                report.error = Some(err);
                break;
            }

            let mut finished: Vec<(String, bool)> = Vec::with_capacity(results.len());
            for run in results {
                finished.push(self.merge(round, run, &mut report).await);
            }
            if out_of_budget {
                self.budget_exhausted(&mut report);
                break;
            }

            for (id, failed) in finished {
                self.route(&id, failed, &report.state, &mut pending);
            }
        }

        log::info!(
            "Workflow '{}' finished after {} invocations in {} rounds",
            self.graph.name(),
            report.steps,
            round
        );
        report
    }

    fn budget_exhausted(&self, report: &mut ExecutionReport) {
        log::error!(
            "Step budget of {} exhausted after {} invocations",
            self.max_steps,
            report.steps
        );
        report.error = Some(ExecutionError::StepBudgetExceeded {
            limit: self.max_steps,
        });
    }

    /// Run one node on its snapshot, retrying up to the node's retry count
    /// while `spare` steps remain
    async fn run_node(
        &self,
        node: &CompiledNode,
        input: AgentInput,
        spare: &AtomicU32,
    ) -> NodeRun {
        let mut attempts = 0;
        loop {
            attempts += 1;
            log::info!("Running node '{}' (attempt {})", node.id, attempts);
            let e = match node.agent.run(input.clone()).await {
                Ok(update) => {
                    return NodeRun {
                        id: node.id.clone(),
                        attempts,
                        out_of_budget: false,
                        result: Ok(update),
                    }
                }
                Err(e) => e,
            };

            let retryable =
                attempts <= node.retries && !matches!(e, AgentError::Llm(LlmError::Cancelled));
            let out_of_budget = retryable
                && spare
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err();
            if !retryable || out_of_budget {
                if out_of_budget {
                    log::warn!("Node '{}' failed with no step budget left to retry", node.id);
                }
                return NodeRun {
                    id: node.id.clone(),
                    attempts,
                    out_of_budget,
                    result: Err(e),
                };
            }
            log::warn!("Node '{}' failed, retrying: {}", node.id, e);
        }
    }

    /// Scalar channels written by more than one node of the same round
    fn conflicting_writes(&self, results: &[NodeRun]) -> Option<ExecutionError> {
        let schema = self.graph.schema();
        let mut writers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for run in results {
            let Ok(update) = &run.result else { continue };
            let channels: BTreeSet<&str> = update.channels().into_iter().collect();
            for channel in channels {
                if schema.kind(channel).map(|k| k.is_exclusive()).unwrap_or(false) {
                    writers.entry(channel).or_default().push(run.id.clone());
                }
            }
        }
        writers
            .into_iter()
            .find(|(_, nodes)| nodes.len() > 1)
            .map(|(channel, nodes)| ExecutionError::ConflictingWrites {
                channel: channel.to_string(),
                nodes,
            })
    }

    /// Merge one node's result; returns the node id and whether it failed
    async fn merge(
        &self,
        round: u32,
        run: NodeRun,
        report: &mut ExecutionReport,
    ) -> (String, bool) {
        let NodeRun { id, result, .. } = run;
        let first_message = report.state.messages().len();

        let merged =
            result.and_then(|update| self.apply_update(&id, update, &mut report.state));
        let (status, channel_updates, error) = match merged {
            Ok(channels) => {
                log::info!("Node '{}' completed", id);
                (NodeStatus::Succeeded, channels, None)
            }
            Err(e) => {
                log::error!("Node '{}' failed: {}", id, e);
                report.state.append_messages(vec![Message::system(format!(
                    "Node '{}' failed: {}",
                    id, e
                ))
                .with_name(id.clone())]);
                let marker = Write::append(FAILED_BRANCH, vec![id.clone().into()]);
                if let Err(se) = report.state.apply(&marker) {
                    log::error!("Could not mark failed branch '{}': {}", id, se);
                }
                report.failed.push(id.clone());
                (
                    NodeStatus::Failed,
                    vec![FAILED_BRANCH.to_string()],
                    Some(e.to_string()),
                )
            }
        };

        let failed = status == NodeStatus::Failed;
        let message_refs = (first_message..report.state.messages().len()).collect();
        self.record(
            report,
            TraceEvent {
                ts: Utc::now(),
                round,
                node: id.clone(),
                status,
                channel_updates,
                message_refs,
                error,
            },
        )
        .await;
        (id, failed)
    }

    /// Apply every write of an update or none of them
    fn apply_update(
        &self,
        id: &str,
        update: StateUpdate,
        state: &mut Blackboard,
    ) -> Result<Vec<String>, AgentError> {
        let declared = self
            .graph
            .node(id)
            .map(|n| n.agent.writes().to_vec())
            .unwrap_or_default();

        let mut next = state.clone();
        let mut channels: Vec<String> = Vec::new();
        for write in &update.writes {
            let channel = write.channel();
            if !declared.iter().any(|d| d == channel) {
                return Err(AgentError::UndeclaredWrite {
                    agent: id.to_string(),
                    channel: channel.to_string(),
                });
            }
            next.apply(write)
                .map_err(|e| AgentError::InvalidOutput(e.to_string()))?;
            if !channels.iter().any(|c| c == channel) {
                channels.push(channel.to_string());
            }
            log::debug!("Merged {:?} from '{}'", write, id);
        }
        if update.messages.is_empty() {
            next.append_messages(vec![Message::system(format!(
                "Node '{}' updated [{}]",
                id,
                channels.join(", ")
            ))
            .with_name(id.to_string())]);
        } else {
            next.append_messages(update.messages);
        }
        *state = next;
        Ok(channels)
    }

    /// Deliver arrivals along the edges leaving `from`
    fn route(
        &self,
        from: &str,
        failed: bool,
        state: &Blackboard,
        pending: &mut BTreeMap<String, Pending>,
    ) {
        for to in self.graph.static_successors(from) {
            if to == END {
                continue;
            }
            let entry = pending.entry(to.clone()).or_default();
            entry.arrived.insert(from.to_string());
            if failed {
                entry.failed.insert(from.to_string());
            }
        }

        if let Some(selector) = self.graph.selector(from) {
            let target = selector.select(state);
            log::info!("Edge from '{}' selected '{}'", from, target);
            if target != END {
                pending
                    .entry(target.to_string())
                    .or_default()
                    .arrived
                    .insert(from.to_string());
            }
        }
    }

    /// Move pending nodes whose barrier is satisfied into the frontier
    async fn release(
        &self,
        round: u32,
        frontier: &mut Vec<String>,
        pending: &mut BTreeMap<String, Pending>,
        report: &mut ExecutionReport,
    ) {
        loop {
            let mut released: Option<(String, Release)> = None;
            let ids = self.order(pending.keys().cloned().collect());
            for id in &ids {
                if let Some(decision) = self.barrier(id, &pending[id], frontier, pending) {
                    released = Some((id.clone(), decision));
                    break;
                }
            }

            // Every waiting node is blocked on another; break the tie in
            // topological order
            if released.is_none() && frontier.is_empty() {
                if let Some(id) = ids.first() {
                    log::warn!("Barrier deadlock, releasing '{}'", id);
                    let p = &pending[id];
                    let decision = if p.arrived.iter().any(|a| !p.failed.contains(a)) {
                        Release::Run
                    } else {
                        Release::ShortCircuit(p.failed.iter().cloned().collect())
                    };
                    released = Some((id.clone(), decision));
                }
            }

            let Some((id, decision)) = released else {
                return;
            };
            pending.remove(&id);
            match decision {
                Release::Run => frontier.push(id),
                Release::ShortCircuit(upstream) => {
                    self.short_circuit(round, &id, &upstream, report).await
                }
            }
        }
    }

    fn barrier(
        &self,
        id: &str,
        p: &Pending,
        frontier: &[String],
        pending: &BTreeMap<String, Pending>,
    ) -> Option<Release> {
        let Some(node) = self.graph.node(id) else {
            return Some(Release::ShortCircuit(Vec::new()));
        };
        let live: Vec<&str> = frontier
            .iter()
            .map(|s| s.as_str())
            .chain(pending.keys().map(|s| s.as_str()))
            .filter(|l| *l != id)
            .collect();
        let can_arrive = |pred: &str| {
            pred != START
                && !p.arrived.contains(pred)
                && live
                    .iter()
                    .any(|l| self.graph.reach_avoiding(l, Some(id)).contains(pred))
        };
        let waiting = self
            .graph
            .static_predecessors(id)
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .chain(self.graph.routed_predecessors(id))
            .any(can_arrive);
        let any_ok = p.arrived.iter().any(|a| !p.failed.contains(a));

        match node.wait_for {
            WaitMode::Any if any_ok => Some(Release::Run),
            _ if waiting => None,
            _ if p.failed.is_empty() => Some(Release::Run),
            _ => Some(Release::ShortCircuit(p.failed.iter().cloned().collect())),
        }
    }

    async fn short_circuit(
        &self,
        round: u32,
        id: &str,
        upstream: &[String],
        report: &mut ExecutionReport,
    ) {
        log::warn!("Skipping '{}': upstream {:?} failed", id, upstream);
        let index = report.state.messages().len();
        report.state.append_messages(vec![Message::system(format!(
            "branch_failed: '{}' skipped because {:?} failed",
            id, upstream
        ))
        .with_name(id.to_string())]);
        report.short_circuited.push(id.to_string());
        self.record(
            report,
            TraceEvent {
                ts: Utc::now(),
                round,
                node: id.to_string(),
                status: NodeStatus::ShortCircuited,
                channel_updates: Vec::new(),
                message_refs: vec![index],
                error: None,
            },
        )
        .await;
    }

    async fn record(&self, report: &mut ExecutionReport, event: TraceEvent) {
        if let Some(tx) = &self.trace_tx {
            let _ = tx.send(event.clone()).await;
        }
        report.trace.push(event);
    }

    /// Topological index, then name; duplicates dropped
    fn order(&self, mut ids: Vec<String>) -> Vec<String> {
        ids.sort_by(|a, b| {
            self.graph
                .topo_index(a)
                .cmp(&self.graph.topo_index(b))
                .then_with(|| a.cmp(b))
        });
        ids.dedup();
        ids
    }
}
