// SPDX-License-Identifier: MIT

//! Input subgraph
//!
//! A small labelled graph plus the path the hypothesis should explain.
//! The JSON shape is shared with other tooling, so unknown node and edge
//! attributes are carried through untouched.

use crate::hypogen::error::HypogenError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub relation: String,
    /// Provenance and any other attributes
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl Edge {
    pub fn new(source: &str, relation: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            relation: relation.to_string(),
            attributes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_name: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    #[serde(default)]
    pub subgraph_id: String,
    pub start_node: String,
    pub end_node: String,
    #[serde(default)]
    pub path_nodes: Vec<String>,
    #[serde(default)]
    pub path_edges: Vec<Edge>,
    #[serde(default)]
    pub graph_data: GraphData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Subgraph {
    /// Build a subgraph whose path is the given chain of edges
    pub fn from_path(id: &str, edges: Vec<Edge>) -> Self {
        let mut path_nodes: Vec<String> = Vec::new();
        for edge in &edges {
            for node in [&edge.source, &edge.target] {
                if path_nodes.last() != Some(node) {
                    path_nodes.push(node.clone());
                }
            }
        }
        let nodes = path_nodes
            .iter()
            .map(|n| Node {
                node_name: n.clone(),
                attributes: BTreeMap::new(),
            })
            .collect();

        Self {
            subgraph_id: id.to_string(),
            start_node: path_nodes.first().cloned().unwrap_or_default(),
            end_node: path_nodes.last().cloned().unwrap_or_default(),
            path_nodes,
            path_edges: edges.clone(),
            graph_data: GraphData { nodes, edges },
            context: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, HypogenError> {
        serde_json::from_str(text)
            .map_err(|e| HypogenError::InvalidInput(format!("malformed subgraph: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, HypogenError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            HypogenError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HypogenError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject inputs the pipeline cannot reason about
    pub fn validate(&self) -> Result<(), HypogenError> {
        if self.start_node.trim().is_empty() || self.end_node.trim().is_empty() {
            return Err(HypogenError::InvalidInput(
                "subgraph start_node and end_node must be set".to_string(),
            ));
        }
        if self.path_edges.is_empty() {
            return Err(HypogenError::InvalidInput(format!(
                "subgraph '{}' has no path edges",
                self.subgraph_id
            )));
        }
        if let Some(edge) = self
            .path_edges
            .iter()
            .find(|e| e.relation.trim().is_empty())
        {
            return Err(HypogenError::InvalidInput(format!(
                "path edge {} -> {} has no relation",
                edge.source, edge.target
            )));
        }
        if !self.path_nodes.is_empty() {
            for edge in &self.path_edges {
                for node in [&edge.source, &edge.target] {
                    if !self.path_nodes.contains(node) {
                        return Err(HypogenError::InvalidInput(format!(
                            "path edge endpoint '{}' is not in path_nodes",
                            node
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Cypher-like path rendering: `A -[:r]-> B -[:s]-> C`
    pub fn path_expression(&self) -> String {
        if self.path_nodes.len() < 2 {
            return self
                .path_edges
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    if i == 0 {
                        format!("{} -[:{}]-> {}", e.source, e.relation, e.target)
                    } else {
                        format!(" -[:{}]-> {}", e.relation, e.target)
                    }
                })
                .collect();
        }

        let mut out = self.path_nodes[0].clone();
        for pair in self.path_nodes.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let forward = self
                .path_edges
                .iter()
                .find(|e| &e.source == a && &e.target == b);
            let backward = self
                .path_edges
                .iter()
                .find(|e| &e.source == b && &e.target == a);
            match (forward, backward) {
                (Some(e), _) => out.push_str(&format!(" -[:{}]-> {}", e.relation, b)),
                (None, Some(e)) => out.push_str(&format!(" <-[:{}]- {}", e.relation, b)),
                (None, None) => out.push_str(&format!(" -- {}", b)),
            }
        }
        out
    }

    /// Full graph rendering for breadth
    pub fn graph_text(&self) -> String {
        let mut out = String::from("Nodes:\n");
        for node in &self.graph_data.nodes {
            out.push_str("- ");
            out.push_str(&node.node_name);
            if !node.attributes.is_empty() {
                let attrs: Vec<String> = node
                    .attributes
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, render_attr(v)))
                    .collect();
                out.push_str(&format!(" ({})", attrs.join(", ")));
            }
            out.push('\n');
        }
        out.push_str("Edges:\n");
        for edge in &self.graph_data.edges {
            out.push_str(&format!(
                "- ({})-[:{}]->({})\n",
                edge.source, edge.relation, edge.target
            ));
        }
        out
    }
}

fn render_attr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
