// SPDX-License-Identifier: MIT

//! The terminal hypothesis record and its artifacts
//!
//! A run produces `hypothesis.json`, `hypothesis.md` and `traces.jsonl`.
//! `TRACE_DIR` moves the trace file to `$TRACE_DIR/<run id>/`.

use crate::adk::message::Message;
use crate::hypogen::error::{ErrorKind, HypogenError};
use crate::hypogen::executor::TraceEvent;
use crate::hypogen::state::schema::{
    CONTEXT, CRITIQUE, FAILED_BRANCH, GRAPH, HYPOTHESIS, ITERATION, MESSAGES, PATH, REFERENCES,
    SCORE, STATEMENT, SUBGRAPH, SUMMARY, TITLE,
};
use crate::hypogen::state::{Blackboard, Reference};
use crate::hypogen::subgraph::Subgraph;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const HYPOTHESIS_JSON: &str = "hypothesis.json";
pub const HYPOTHESIS_MD: &str = "hypothesis.md";
pub const TRACES_JSONL: &str = "traces.jsonl";

static STATEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)hypothesis\s+statement\s*\**\s*:\s*\**\s*(.+?)(?:\n\s*\n|\z)")
        .expect("valid statement regex")
});

/// Channels reported under their own metadata fields rather than as
/// analyst outputs
const CORE_CHANNELS: &[&str] = &[
    SUBGRAPH,
    CONTEXT,
    PATH,
    GRAPH,
    HYPOTHESIS,
    CRITIQUE,
    REFERENCES,
    MESSAGES,
    ITERATION,
    SCORE,
    TITLE,
    STATEMENT,
    SUMMARY,
    FAILED_BRANCH,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Partial,
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Ok => write!(f, "ok"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub status: RunStatus,
    pub run_id: Uuid,
    pub subgraph_id: String,
    /// Rendered path the hypothesis explains
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iteration: u64,
    /// Agent invocations spent
    pub steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub analyst_outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub failed_nodes: Vec<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub title: String,
    pub statement: String,
    /// Ordered, unique by citation key
    #[serde(default)]
    pub references: Vec<Reference>,
    pub metadata: Metadata,
}

/// Title used when the pipeline produced none
pub fn default_title(subgraph: &Subgraph) -> String {
    format!(
        "Hypothesis for {} -> {}",
        subgraph.start_node, subgraph.end_node
    )
}

/// Pull the text after a "Hypothesis Statement:" heading, if any
pub fn extract_statement(text: &str) -> Option<String> {
    STATEMENT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Hypothesis {
    /// Read the terminal blackboard; run bookkeeping starts as a clean run
    pub fn from_state(state: &Blackboard, subgraph: &Subgraph) -> Self {
        let title = state
            .text(TITLE)
            .map(|t| t.trim().trim_start_matches('#').trim().to_string())
            .unwrap_or_else(|| default_title(subgraph));

        let statement = state
            .text(STATEMENT)
            .map(|s| extract_statement(s).unwrap_or_else(|| s.trim().to_string()))
            .or_else(|| {
                state.text(HYPOTHESIS).map(|h| {
                    extract_statement(h).unwrap_or_else(|| h.trim().to_string())
                })
            })
            .unwrap_or_default();

        let analyst_outputs = state
            .schema()
            .channels
            .keys()
            .filter(|c| !CORE_CHANNELS.contains(&c.as_str()))
            .filter_map(|c| {
                let value = state.get(c)?;
                let empty = match value {
                    Value::Null => true,
                    Value::String(s) => s.trim().is_empty(),
                    Value::Array(items) => items.is_empty(),
                    Value::Object(map) => map.is_empty(),
                    _ => false,
                };
                (!empty).then(|| (c.clone(), value.clone()))
            })
            .collect();

        let now = Utc::now();
        Self {
            title,
            statement,
            references: state.references(),
            metadata: Metadata {
                status: RunStatus::Ok,
                run_id: Uuid::new_v4(),
                subgraph_id: subgraph.subgraph_id.clone(),
                path: subgraph.path_expression(),
                error_kind: None,
                error: None,
                iteration: state.count(ITERATION),
                steps: 0,
                critique: state.text(CRITIQUE).map(str::to_string),
                score: state.get(SCORE).and_then(Value::as_f64),
                summary: state.text(SUMMARY).map(str::to_string),
                context: state.text(CONTEXT).map(str::to_string),
                analyst_outputs,
                failed_nodes: state
                    .list(FAILED_BRANCH)
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                messages: state.messages().to_vec(),
                started_at: now,
                finished_at: now,
            },
        }
    }

    /// Record for a run that never reached the executor
    pub fn aborted(subgraph: &Subgraph, kind: ErrorKind, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let now = Utc::now();
        Self {
            title: default_title(subgraph),
            statement: String::new(),
            references: Vec::new(),
            metadata: Metadata {
                status: RunStatus::Aborted,
                run_id: Uuid::new_v4(),
                subgraph_id: subgraph.subgraph_id.clone(),
                path: subgraph.path_expression(),
                error_kind: Some(kind),
                error: Some(reason.clone()),
                iteration: 0,
                steps: 0,
                critique: None,
                score: None,
                summary: None,
                context: subgraph.context.clone(),
                analyst_outputs: BTreeMap::new(),
                failed_nodes: Vec::new(),
                messages: vec![Message::system(reason).with_name("validation")],
                started_at: now,
                finished_at: now,
            },
        }
    }

    pub fn status(&self) -> RunStatus {
        self.metadata.status
    }

    pub fn to_json(&self) -> Result<String, HypogenError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, HypogenError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, HypogenError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n\n", self.title);

        md.push_str("## Hypothesis Statement\n\n");
        if self.statement.is_empty() {
            md.push_str("_No statement was produced._\n\n");
        } else {
            md.push_str(&self.statement);
            md.push_str("\n\n");
        }

        md.push_str("## References\n\n");
        if self.references.is_empty() {
            md.push_str("_No references._\n\n");
        } else {
            for (i, reference) in self.references.iter().enumerate() {
                md.push_str(&format!("{}. {}\n", i + 1, reference.display_line()));
            }
            md.push('\n');
        }

        if let Some(critique) = &self.metadata.critique {
            md.push_str(&format!("## Critique\n\n{}\n\n", critique.trim()));
        }
        if let Some(context) = &self.metadata.context {
            md.push_str(&format!("## Context\n\n{}\n\n", context.trim()));
        }

        md.push_str("## Run\n\n");
        md.push_str(&format!("- Status: {}\n", self.metadata.status));
        md.push_str(&format!("- Path: `{}`\n", self.metadata.path));
        md.push_str(&format!("- Iterations: {}\n", self.metadata.iteration));
        md.push_str(&format!("- Steps: {}\n", self.metadata.steps));
        if let Some(error) = &self.metadata.error {
            md.push_str(&format!("- Error: {}\n", error));
        }
        md.push_str(&format!("- Run id: {}\n", self.metadata.run_id));
        md
    }
}

/// Where an artifact set was written
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
    pub traces: PathBuf,
}

/// Shared trace root from `TRACE_DIR`, if set
pub fn trace_root() -> Option<PathBuf> {
    std::env::var("TRACE_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from)
}

/// Directory for one run's `traces.jsonl`: `<root>/<run id>` under a trace
/// root, the artifact directory otherwise
pub fn trace_dir(root: Option<&Path>, dir: &Path, run_id: Uuid) -> PathBuf {
    match root {
        Some(root) => root.join(run_id.to_string()),
        None => dir.to_path_buf(),
    }
}

pub fn write_traces(path: &Path, events: &[TraceEvent]) -> Result<(), HypogenError> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for event in events {
        serde_json::to_writer(&mut file, event)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}

pub fn read_traces(path: &Path) -> Result<Vec<TraceEvent>, HypogenError> {
    std::fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(HypogenError::from))
        .collect()
}

/// Write the JSON and Markdown artifacts plus the trace log
pub fn write_artifacts(
    dir: &Path,
    hypothesis: &Hypothesis,
    trace: &[TraceEvent],
) -> Result<ArtifactPaths, HypogenError> {
    write_artifacts_with_root(dir, trace_root().as_deref(), hypothesis, trace)
}

fn write_artifacts_with_root(
    dir: &Path,
    trace_root: Option<&Path>,
    hypothesis: &Hypothesis,
    trace: &[TraceEvent],
) -> Result<ArtifactPaths, HypogenError> {
    std::fs::create_dir_all(dir)?;
    let paths = ArtifactPaths {
        json: dir.join(HYPOTHESIS_JSON),
        markdown: dir.join(HYPOTHESIS_MD),
        traces: {
            let traces = trace_dir(trace_root, dir, hypothesis.metadata.run_id);
            std::fs::create_dir_all(&traces)?;
            traces.join(TRACES_JSONL)
        },
    };

    std::fs::write(&paths.json, hypothesis.to_json()?)?;
    std::fs::write(&paths.markdown, hypothesis.to_markdown())?;
    write_traces(&paths.traces, trace)?;

    log::info!("Wrote artifacts to {}", dir.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypogen::executor::NodeStatus;
    use crate::hypogen::state::{ChannelDef, FieldType, StateSchema, Write};
    use crate::hypogen::subgraph::Edge;
    use serde_json::json;
    use std::sync::Arc;

    fn subgraph() -> Subgraph {
        Subgraph::from_path(
            "sg-1",
            vec![Edge::new("A", "r1", "B"), Edge::new("B", "r2", "C")],
        )
    }

    fn finished_state() -> Blackboard {
        let schema =
            StateSchema::hypothesis().with("novelty", ChannelDef::scalar(FieldType::String));
        let mut state = Blackboard::new(Arc::new(schema));
        for write in [
            Write::set(
                HYPOTHESIS,
                json!("Some preamble.\n\nHypothesis Statement: A drives C through B.\n\nRationale: ..."),
            ),
            Write::set(CRITIQUE, json!("ACCEPT")),
            Write::increment(ITERATION),
            Write::set("novelty", json!("high")),
            Write::append(
                REFERENCES,
                vec![json!("PMID: 1"), json!("PMID: 1"), json!("PMID: 2")],
            ),
        ] {
            state.apply(&write).unwrap();
        }
        state.append_messages(vec![Message::assistant("draft").with_name("generator")]);
        state
    }

    #[test]
    fn test_extract_statement() {
        assert_eq!(
            extract_statement("**Hypothesis Statement:** X inhibits Y.\n\nMore"),
            Some("X inhibits Y.".to_string())
        );
        assert_eq!(
            extract_statement("hypothesis statement: spans\ntwo lines"),
            Some("spans\ntwo lines".to_string())
        );
        assert_eq!(extract_statement("no heading here"), None);
    }

    #[test]
    fn test_from_state() {
        let hyp = Hypothesis::from_state(&finished_state(), &subgraph());
        assert_eq!(hyp.title, "Hypothesis for A -> C");
        assert_eq!(hyp.statement, "A drives C through B.");
        assert_eq!(hyp.references.len(), 2);
        assert_eq!(hyp.metadata.iteration, 1);
        assert_eq!(hyp.metadata.critique.as_deref(), Some("ACCEPT"));
        assert_eq!(hyp.metadata.analyst_outputs["novelty"], json!("high"));
        assert!(!hyp.metadata.analyst_outputs.contains_key("paths"));
        assert_eq!(hyp.metadata.messages.len(), 1);
        assert_eq!(hyp.metadata.path, "A -[:r1]-> B -[:r2]-> C");
    }

    #[test]
    fn test_title_and_statement_channels_win() {
        let mut state = finished_state();
        state.apply(&Write::set(TITLE, json!("# B bridges A and C"))).unwrap();
        state.apply(&Write::set(STATEMENT, json!("B bridges A and C."))).unwrap();
        let hyp = Hypothesis::from_state(&state, &subgraph());
        assert_eq!(hyp.title, "B bridges A and C");
        assert_eq!(hyp.statement, "B bridges A and C.");
    }

    #[test]
    fn test_json_round_trip() {
        let hyp = Hypothesis::from_state(&finished_state(), &subgraph());
        let back = Hypothesis::from_json(&hyp.to_json().unwrap()).unwrap();
        assert_eq!(back, hyp);
    }

    #[test]
    fn test_aborted() {
        let hyp = Hypothesis::aborted(&subgraph(), ErrorKind::InvalidInput, "no path edges");
        assert_eq!(hyp.status(), RunStatus::Aborted);
        assert_eq!(hyp.metadata.messages[0].content, "no path edges");
        let value = serde_json::to_value(&hyp).unwrap();
        assert_eq!(value["metadata"]["status"], json!("aborted"));
        assert_eq!(value["metadata"]["error_kind"], json!("invalid_input"));
    }

    #[test]
    fn test_markdown_sections() {
        let md = Hypothesis::from_state(&finished_state(), &subgraph()).to_markdown();
        assert!(md.starts_with("# Hypothesis for A -> C\n"));
        assert!(md.contains("## Hypothesis Statement\n\nA drives C through B."));
        assert!(md.contains("## References\n\n1. "));
        assert!(md.contains("## Critique\n\nACCEPT"));
        assert!(md.contains("- Status: ok"));
    }

    #[test]
    fn test_write_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let hyp = Hypothesis::from_state(&finished_state(), &subgraph());
        let event = TraceEvent {
            ts: Utc::now(),
            round: 1,
            node: "generator".to_string(),
            status: NodeStatus::Succeeded,
            channel_updates: vec![HYPOTHESIS.to_string()],
            message_refs: vec![0],
            error: None,
        };

        let paths = write_artifacts(dir.path(), &hyp, &[event.clone()]).unwrap();
        assert_eq!(Hypothesis::load(&paths.json).unwrap(), hyp);
        assert!(std::fs::read_to_string(&paths.markdown)
            .unwrap()
            .contains("A drives C"));
        assert_eq!(read_traces(&paths.traces).unwrap(), vec![event]);
    }

    #[test]
    fn test_trace_root_keeps_runs_apart() {
        let out = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let event = |node: &str| TraceEvent {
            ts: Utc::now(),
            round: 1,
            node: node.to_string(),
            status: NodeStatus::Succeeded,
            channel_updates: Vec::new(),
            message_refs: Vec::new(),
            error: None,
        };

        let first = Hypothesis::from_state(&finished_state(), &subgraph());
        let second = Hypothesis::from_state(&finished_state(), &subgraph());
        let a = write_artifacts_with_root(
            &out.path().join("hypothesis_1"),
            Some(root.path()),
            &first,
            &[event("a")],
        )
        .unwrap();
        let b = write_artifacts_with_root(
            &out.path().join("hypothesis_2"),
            Some(root.path()),
            &second,
            &[event("b")],
        )
        .unwrap();

        assert_ne!(a.traces, b.traces);
        assert_eq!(
            a.traces,
            root.path()
                .join(first.metadata.run_id.to_string())
                .join(TRACES_JSONL)
        );
        assert_eq!(read_traces(&a.traces).unwrap()[0].node, "a");
        assert_eq!(read_traces(&b.traces).unwrap()[0].node, "b");
    }
}
