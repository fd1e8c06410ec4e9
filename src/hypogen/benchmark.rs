// SPDX-License-Identifier: MIT

//! Batch runs over a directory of subgraphs
//!
//! Every `*.json` file in the input directory is one subgraph. Each run
//! writes its artifacts under `<output>/<subgraph id>/`; the summary lands
//! in `benchmark.json` and `benchmark.md`.

use crate::hypogen::driver::HypothesisDriver;
use crate::hypogen::error::HypogenError;
use crate::hypogen::hypothesis::{write_artifacts, Hypothesis, RunStatus};
use crate::hypogen::subgraph::Subgraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const BENCHMARK_JSON: &str = "benchmark.json";
pub const BENCHMARK_MD: &str = "benchmark.md";

/// Outcome of one subgraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkEntry {
    pub id: String,
    pub status: RunStatus,
    pub iterations: u64,
    pub steps: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BenchmarkEntry {
    fn from_hypothesis(id: String, hypothesis: &Hypothesis, elapsed_ms: u64) -> Self {
        Self {
            id,
            status: hypothesis.metadata.status,
            iterations: hypothesis.metadata.iteration,
            steps: hypothesis.metadata.steps,
            elapsed_ms,
            error: hypothesis.metadata.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<BenchmarkEntry>,
}

impl BenchmarkReport {
    pub fn count(&self, status: RunStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn mean_elapsed_ms(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let total: u64 = self.entries.iter().map(|e| e.elapsed_ms).sum();
        Some(total as f64 / self.entries.len() as f64)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Benchmark: {}\n", self.pipeline);
        let _ = writeln!(out, "Started: {}\n", self.started_at.to_rfc3339());
        let _ = writeln!(
            out,
            "- Runs: {}\n- Ok: {}\n- Partial: {}\n- Aborted: {}",
            self.entries.len(),
            self.count(RunStatus::Ok),
            self.count(RunStatus::Partial),
            self.count(RunStatus::Aborted)
        );
        if let Some(mean) = self.mean_elapsed_ms() {
            let _ = writeln!(out, "- Mean elapsed: {:.0} ms", mean);
        }

        out.push_str("\n| Subgraph | Status | Iterations | Steps | Elapsed (ms) | Error |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for e in &self.entries {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                e.id,
                e.status,
                e.iterations,
                e.steps,
                e.elapsed_ms,
                e.error.as_deref().unwrap_or("").replace('|', "\\|")
            );
        }
        out
    }

    /// Write `benchmark.json` and `benchmark.md` into `dir`
    pub fn write(&self, dir: &Path) -> Result<(PathBuf, PathBuf), HypogenError> {
        std::fs::create_dir_all(dir)?;
        let json = dir.join(BENCHMARK_JSON);
        let markdown = dir.join(BENCHMARK_MD);
        std::fs::write(&json, serde_json::to_string_pretty(self)?)?;
        std::fs::write(&markdown, self.to_markdown())?;
        Ok((json, markdown))
    }
}

/// Subgraph files in a directory, sorted by name
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, HypogenError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| HypogenError::InvalidInput(format!("cannot read {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Run the driver over every subgraph in `input` and write the summary to `output`
pub async fn run_benchmark(
    driver: &HypothesisDriver,
    pipeline: &str,
    input: &Path,
    output: &Path,
) -> Result<BenchmarkReport, HypogenError> {
    let files = discover(input)?;
    if files.is_empty() {
        return Err(HypogenError::InvalidInput(format!(
            "no subgraph files in {}",
            input.display()
        )));
    }
    log::info!("Benchmarking {} subgraphs from {}", files.len(), input.display());

    let mut report = BenchmarkReport {
        pipeline: pipeline.to_string(),
        started_at: Utc::now(),
        entries: Vec::with_capacity(files.len()),
    };
    for file in &files {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let started = Instant::now();

        let (id, hypothesis, trace) = match Subgraph::load(file) {
            Ok(subgraph) => {
                let id = if subgraph.subgraph_id.is_empty() {
                    stem
                } else {
                    subgraph.subgraph_id.clone()
                };
                let outcome = driver.run(&subgraph).await;
                (id, outcome.hypothesis, outcome.trace)
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", file.display(), e);
                let placeholder = Subgraph {
                    subgraph_id: stem.clone(),
                    start_node: String::new(),
                    end_node: String::new(),
                    path_nodes: Vec::new(),
                    path_edges: Vec::new(),
                    graph_data: Default::default(),
                    context: None,
                };
                (stem, Hypothesis::aborted(&placeholder, e.kind(), e.to_string()), Vec::new())
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        write_artifacts(&output.join(sanitize(&id)), &hypothesis, &trace)?;
        let entry = BenchmarkEntry::from_hypothesis(id, &hypothesis, elapsed_ms);
        log::info!(
            "{}: {} in {} ms ({} iterations)",
            entry.id,
            entry.status,
            entry.elapsed_ms,
            entry.iterations
        );
        report.entries.push(entry);
    }

    report.write(output)?;
    Ok(report)
}

fn sanitize(id: &str) -> String {
    id.replace(['/', '\\', ':'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::agent::{Agent, AgentInput, StateUpdate, Write};
    use crate::adk::error::AgentError;
    use crate::hypogen::config::RunConfig;
    use crate::hypogen::graph::{NodeSpec, WorkflowGraph, END, START};
    use crate::hypogen::state::schema::HYPOTHESIS;
    use crate::hypogen::state::StateSchema;
    use crate::hypogen::subgraph::Edge;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixed {
        writes: Vec<String>,
    }

    #[async_trait]
    impl Agent for Fixed {
        fn name(&self) -> &str {
            "generator"
        }
        fn reads(&self) -> &[String] {
            &[]
        }
        fn writes(&self) -> &[String] {
            &self.writes
        }
        async fn run(&self, _input: AgentInput) -> Result<StateUpdate, AgentError> {
            Ok(StateUpdate::new().with_write(Write::set(
                HYPOTHESIS,
                json!("Hypothesis Statement: it works."),
            )))
        }
    }

    fn driver() -> HypothesisDriver {
        let graph = WorkflowGraph::builder("bench", StateSchema::hypothesis())
            .node(NodeSpec::new(Arc::new(Fixed {
                writes: vec![HYPOTHESIS.to_string()],
            })))
            .edge(START, "generator")
            .edge("generator", END)
            .build()
            .unwrap();
        HypothesisDriver::new(Arc::new(graph), RunConfig::default())
    }

    #[tokio::test]
    async fn test_benchmark_directory() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        Subgraph::from_path("b-2", vec![Edge::new("A", "r", "B")])
            .save(input.path().join("b.json"))
            .unwrap();
        Subgraph::from_path("a-1", vec![Edge::new("C", "s", "D")])
            .save(input.path().join("a.json"))
            .unwrap();
        std::fs::write(input.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(input.path().join("notes.txt"), "ignored").unwrap();

        let report = run_benchmark(&driver(), "bench", input.path(), output.path())
            .await
            .unwrap();

        let ids: Vec<&str> = report.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a-1", "b-2", "broken"]);
        assert_eq!(report.count(RunStatus::Ok), 2);
        assert_eq!(report.count(RunStatus::Aborted), 1);
        assert_eq!(report.entries[0].steps, 1);

        assert!(output.path().join("a-1").join("hypothesis.json").exists());
        let saved: BenchmarkReport = serde_json::from_str(
            &std::fs::read_to_string(output.path().join(BENCHMARK_JSON)).unwrap(),
        )
        .unwrap();
        assert_eq!(saved, report);
        let md = std::fs::read_to_string(output.path().join(BENCHMARK_MD)).unwrap();
        assert!(md.contains("| a-1 | ok | 0 | 1 |"));
        assert!(md.contains("- Aborted: 1"));
    }

    #[tokio::test]
    async fn test_empty_directory_is_invalid() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let err = run_benchmark(&driver(), "bench", input.path(), output.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HypogenError::InvalidInput(_)));
    }
}
