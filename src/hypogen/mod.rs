// SPDX-License-Identifier: MIT

//! Hypothesis generation over knowledge-graph subgraphs
//!
//! A pipeline of LLM agents shares a typed blackboard; the executor runs it
//! as a graph with fan-out, barriers and a bounded refinement loop.

pub mod benchmark;
pub mod builder;
pub mod condition;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hypothesis;
pub mod state;
pub mod subgraph;
pub mod tools;

pub use driver::{DriverOutcome, HypothesisDriver};
pub use error::{ErrorKind, HypogenError};
pub use hypothesis::{Hypothesis, RunStatus};
pub use subgraph::Subgraph;
