// SPDX-License-Identifier: MIT

//! Compiled workflow graph
//!
//! `GraphBuilder` collects nodes and edges; `build()` runs every structural
//! check before anything executes, so a `WorkflowGraph` in hand is known to
//! be well formed.

use super::selector::Selector;
use super::types::{WaitMode, END, START};
use crate::adk::agent::Agent;
use crate::hypogen::error::GraphError;
use crate::hypogen::state::schema::{FAILED_BRANCH, ITERATION, MESSAGES};
use crate::hypogen::state::StateSchema;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Node as handed to the builder
pub struct NodeSpec {
    pub agent: Arc<dyn Agent>,
    pub retries: u32,
    pub wait_for: WaitMode,
}

impl NodeSpec {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            retries: 0,
            wait_for: WaitMode::All,
        }
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn wait_for(mut self, mode: WaitMode) -> Self {
        self.wait_for = mode;
        self
    }
}

/// Node ready for execution
pub struct CompiledNode {
    pub id: String,
    pub agent: Arc<dyn Agent>,
    pub retries: u32,
    pub wait_for: WaitMode,
    /// Position in the topological order, gate edges excluded
    pub topo_index: usize,
}

pub struct GraphBuilder {
    name: String,
    schema: StateSchema,
    nodes: Vec<NodeSpec>,
    statics: Vec<(String, String)>,
    selectors: Vec<(String, Selector)>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>, schema: StateSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            nodes: Vec::new(),
            statics: Vec::new(),
            selectors: Vec::new(),
        }
    }

    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.statics.push((from.to_string(), to.to_string()));
        self
    }

    pub fn fan_out(mut self, from: &str, targets: &[&str]) -> Self {
        for to in targets {
            self.statics.push((from.to_string(), to.to_string()));
        }
        self
    }

    pub fn conditional(mut self, from: &str, selector: Selector) -> Self {
        self.selectors.push((from.to_string(), selector));
        self
    }

    pub fn build(self) -> Result<WorkflowGraph, GraphError> {
        let GraphBuilder {
            name,
            schema,
            nodes: specs,
            statics,
            selectors: selector_list,
        } = self;

        let mut order: Vec<String> = Vec::new();
        let mut agents: BTreeMap<String, NodeSpec> = BTreeMap::new();
        for spec in specs {
            let id = spec.agent.name().to_string();
            if id == START || id == END || agents.contains_key(&id) {
                return Err(GraphError::DuplicateNode(id));
            }
            order.push(id.clone());
            agents.insert(id, spec);
        }

        let is_source = |id: &str| id == START || agents.contains_key(id);
        let is_target = |id: &str| id == END || agents.contains_key(id);

        let mut successors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (from, to) in &statics {
            if !is_source(from.as_str()) {
                return Err(GraphError::UnknownNode {
                    from: from.clone(),
                    node: from.clone(),
                });
            }
            if !is_target(to.as_str()) {
                return Err(GraphError::UnknownNode {
                    from: from.clone(),
                    node: to.clone(),
                });
            }
            let out = successors.entry(from.clone()).or_default();
            if !out.contains(to) {
                out.push(to.clone());
            }
        }

        let mut selectors: BTreeMap<String, Selector> = BTreeMap::new();
        for (from, selector) in selector_list {
            if !is_source(from.as_str()) {
                return Err(GraphError::UnknownNode {
                    from: from.clone(),
                    node: from,
                });
            }
            if let Some(to) = selector.targets().into_iter().find(|t| !is_target(*t)) {
                return Err(GraphError::UnknownNode {
                    from: from.clone(),
                    node: to.to_string(),
                });
            }
            if selectors.contains_key(&from) {
                return Err(GraphError::MultipleSelectors { node: from });
            }
            selectors.insert(from, selector);
        }

        if !successors.contains_key(START) && !selectors.contains_key(START) {
            return Err(GraphError::NoEntry);
        }

        let mut predecessors: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (from, targets) in &successors {
            for to in targets {
                if to != END {
                    predecessors
                        .entry(to.clone())
                        .or_default()
                        .insert(from.clone());
                }
            }
        }

        let mut graph = WorkflowGraph {
            name,
            schema: Arc::new(schema),
            nodes: BTreeMap::new(),
            order,
            successors,
            predecessors,
            selectors,
        };

        graph.check_channels(&agents)?;
        graph.check_reachability()?;
        graph.check_sinks()?;
        let topo = graph.topological_order()?;
        graph.check_gated_cycles(&agents)?;
        graph.check_scalar_conflicts(&agents)?;

        for (index, id) in topo.iter().enumerate() {
            if let Some(spec) = agents.remove(id) {
                graph.nodes.insert(
                    id.clone(),
                    CompiledNode {
                        id: id.clone(),
                        agent: spec.agent,
                        retries: spec.retries,
                        wait_for: spec.wait_for,
                        topo_index: index,
                    },
                );
            }
        }

        log::debug!(
            "Compiled workflow '{}' with {} nodes in order {:?}",
            graph.name,
            graph.nodes.len(),
            topo
        );
        Ok(graph)
    }
}

/// A validated workflow graph
pub struct WorkflowGraph {
    name: String,
    schema: Arc<StateSchema>,
    nodes: BTreeMap<String, CompiledNode>,
    /// Declaration order
    order: Vec<String>,
    /// Static successors, `START` included as a source
    successors: BTreeMap<String, Vec<String>>,
    /// Static predecessors, `START` included
    predecessors: BTreeMap<String, BTreeSet<String>>,
    selectors: BTreeMap<String, Selector>,
}

impl WorkflowGraph {
    pub fn builder(name: impl Into<String>, schema: StateSchema) -> GraphBuilder {
        GraphBuilder::new(name, schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Arc<StateSchema> {
        self.schema.clone()
    }

    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.get(id)
    }

    /// Node ids in declaration order
    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn static_successors(&self, from: &str) -> &[String] {
        self.successors.get(from).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn static_predecessors(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.predecessors.get(id)
    }

    pub fn selector(&self, from: &str) -> Option<&Selector> {
        self.selectors.get(from)
    }

    /// Nodes whose selector can pick `id`
    pub fn routed_predecessors(&self, id: &str) -> Vec<&str> {
        self.selectors
            .iter()
            .filter(|(_, selector)| selector.targets().contains(&id))
            .map(|(from, _)| from.as_str())
            .collect()
    }

    pub fn topo_index(&self, id: &str) -> usize {
        self.nodes.get(id).map(|n| n.topo_index).unwrap_or(usize::MAX)
    }

    /// Every possible successor: static targets then selector targets
    pub fn successors(&self, from: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .static_successors(from)
            .iter()
            .map(|s| s.as_str())
            .collect();
        if let Some(selector) = self.selectors.get(from) {
            for target in selector.targets() {
                if !out.contains(&target) {
                    out.push(target);
                }
            }
        }
        out
    }

    /// Nodes reachable from `from` (inclusive) without entering `avoid`
    pub fn reach_avoiding(&self, from: &str, avoid: Option<&str>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        while let Some(id) = queue.pop_front() {
            if Some(id.as_str()) == avoid || !seen.insert(id.clone()) {
                continue;
            }
            for next in self.successors(&id) {
                if next != END && !seen.contains(next) {
                    queue.push_back(next.to_string());
                }
            }
        }
        seen
    }

    pub fn reach(&self, from: &str) -> BTreeSet<String> {
        self.reach_avoiding(from, None)
    }

    fn check_channels(&self, agents: &BTreeMap<String, NodeSpec>) -> Result<(), GraphError> {
        for id in &self.order {
            let agent = &agents[id].agent;
            for channel in agent.reads().iter().chain(agent.writes()) {
                if !self.schema.contains(channel) {
                    return Err(GraphError::UnknownChannel {
                        node: id.clone(),
                        channel: channel.clone(),
                    });
                }
            }
            if let Some(channel) = agent
                .writes()
                .iter()
                .find(|c| c.as_str() == MESSAGES || c.as_str() == FAILED_BRANCH)
            {
                return Err(GraphError::ReservedChannel {
                    node: id.clone(),
                    channel: channel.clone(),
                });
            }
        }

        for (from, selector) in &self.selectors {
            if let Some(channel) = selector
                .channels()
                .into_iter()
                .find(|c| !self.schema.contains(c))
            {
                return Err(GraphError::UnknownChannel {
                    node: from.clone(),
                    channel: channel.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_reachability(&self) -> Result<(), GraphError> {
        let reached = self.reach(START);
        match self.order.iter().find(|id| !reached.contains(*id)) {
            Some(id) => Err(GraphError::Unreachable(id.clone())),
            None => Ok(()),
        }
    }

    /// Every node must reach `END` or a node without outgoing edges
    fn check_sinks(&self) -> Result<(), GraphError> {
        let mut can_finish: BTreeSet<&str> = self
            .order
            .iter()
            .map(|id| id.as_str())
            .filter(|id| {
                let next = self.successors(id);
                next.is_empty() || next.contains(&END)
            })
            .collect();

        loop {
            let before = can_finish.len();
            for id in &self.order {
                if !can_finish.contains(id.as_str())
                    && self
                        .successors(id)
                        .iter()
                        .any(|next| can_finish.contains(next))
                {
                    can_finish.insert(id.as_str());
                }
            }
            if can_finish.len() == before {
                break;
            }
        }

        match self.order.iter().find(|id| !can_finish.contains(id.as_str())) {
            Some(id) => Err(GraphError::NoPathToSink(id.clone())),
            None => Ok(()),
        }
    }

    /// Kahn's algorithm over every edge except gate edges, ties broken by
    /// declaration order. Leftover nodes sit on a cycle no gate bounds.
    fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let position: BTreeMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut in_degree: BTreeMap<&str, usize> =
            self.order.iter().map(|id| (id.as_str(), 0)).collect();
        for id in &self.order {
            for next in self.ungated_successors(id) {
                if let Some(d) = in_degree.get_mut(next) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| position[id])
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(pos) = ready.pop_first() {
            let id = self.order[pos].as_str();
            sorted.push(id.to_string());
            for next in self.ungated_successors(id) {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(position[next]);
                    }
                }
            }
        }

        if sorted.len() < self.order.len() {
            let cycle: Vec<String> = self
                .order
                .iter()
                .filter(|id| !sorted.contains(id))
                .cloned()
                .collect();
            return Err(GraphError::UnboundedCycle(cycle));
        }
        Ok(sorted)
    }

    fn ungated_successors(&self, from: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .static_successors(from)
            .iter()
            .map(|s| s.as_str())
            .collect();
        if let Some(selector) = self.selectors.get(from) {
            if !selector.is_bounded() {
                for target in selector.targets() {
                    if !out.contains(&target) {
                        out.push(target);
                    }
                }
            }
        }
        out.retain(|t| *t != END);
        out
    }

    /// A gate bounds its loop only if some node on the loop bumps `iteration`
    fn check_gated_cycles(&self, agents: &BTreeMap<String, NodeSpec>) -> Result<(), GraphError> {
        for (from, selector) in &self.selectors {
            let Selector::Gate { revise, .. } = selector else {
                continue;
            };
            if revise == END {
                continue;
            }
            let from_revise = self.reach(revise);
            if !from_revise.contains(from) {
                continue;
            }

            let cycle: Vec<String> = self
                .order
                .iter()
                .filter(|id| from_revise.contains(*id) && self.reach(id).contains(from))
                .cloned()
                .collect();
            let counted = cycle.iter().any(|id| {
                agents[id]
                    .agent
                    .writes()
                    .iter()
                    .any(|w| w == ITERATION)
            });
            if !counted {
                return Err(GraphError::UnboundedCycle(cycle));
            }
        }
        Ok(())
    }

    /// Two writers of one scalar channel may never run in the same round.
    /// Static successors of a node start together, and so does whatever its
    /// selector picks, so a writer reachable from one sibling conflicts with
    /// a writer reachable from another unless one is ordered after the other.
    /// Targets of one selector are exclusive and never siblings of each other.
    fn check_scalar_conflicts(
        &self,
        agents: &BTreeMap<String, NodeSpec>,
    ) -> Result<(), GraphError> {
        let reach: BTreeMap<String, BTreeSet<String>> = self
            .order
            .iter()
            .map(|id| (id.clone(), self.reach(id)))
            .collect();
        let ordered = |a: &String, b: &String| reach[a].contains(b) || reach[b].contains(a);

        let forks = std::iter::once(START).chain(self.order.iter().map(|s| s.as_str()));
        for fork in forks {
            let statics: Vec<&str> = self
                .static_successors(fork)
                .iter()
                .map(|s| s.as_str())
                .filter(|s| *s != END)
                .collect();
            let routed: Vec<&str> = self
                .selectors
                .get(fork)
                .map(|s| s.targets())
                .unwrap_or_default()
                .into_iter()
                .filter(|t| *t != END && !statics.contains(t))
                .collect();

            let mut pairs: Vec<(&str, &str)> = Vec::new();
            for (i, left) in statics.iter().enumerate() {
                for right in statics[i + 1..].iter().chain(&routed) {
                    pairs.push((*left, *right));
                }
            }

            for (left, right) in pairs {
                for x in &reach[left] {
                    for y in &reach[right] {
                        if x == y || ordered(x, y) {
                            continue;
                        }
                        let ys = exclusive_writes(&self.schema, agents[y].agent.as_ref());
                        if let Some(channel) =
                            exclusive_writes(&self.schema, agents[x].agent.as_ref())
                                .into_iter()
                                .find(|c| ys.contains(c))
                        {
                            let (first, second) = if x < y { (x, y) } else { (y, x) };
                            return Err(GraphError::ScalarConflict {
                                channel: channel.clone(),
                                first: first.clone(),
                                second: second.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Channels an agent writes whose kind forbids concurrent writers
fn exclusive_writes<'a>(schema: &StateSchema, agent: &'a dyn Agent) -> Vec<&'a String> {
    agent
        .writes()
        .iter()
        .filter(|c| schema.kind(c).map(|k| k.is_exclusive()).unwrap_or(false))
        .collect()
}
