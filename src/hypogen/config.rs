// SPDX-License-Identifier: MIT

//! Run configuration
//!
//! Defaults are overlaid by a pipeline's `settings:` block and then by
//! command-line flags. Every `Settings` field is optional so a layer only
//! overrides what it names.

use crate::adk::llm::AdapterConfig;
use serde::{Deserialize, Serialize};

/// A partial set of run settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub max_iterations: Option<u64>,
    pub max_steps: Option<u32>,
    pub max_tool_steps: Option<u32>,
    pub structured_retries: Option<u32>,
    pub transient_retries: Option<u32>,
    pub max_concurrent_llm: Option<usize>,
    pub llm_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub node_retries: Option<u32>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    /// Refinement-loop cap enforced by gate edges
    pub max_iterations: u64,
    /// Global budget of agent invocations
    pub max_steps: u32,
    /// Default extra attempts for a failed node
    pub node_retries: u32,
    pub adapter: AdapterConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_steps: 100,
            node_retries: 0,
            adapter: AdapterConfig::default(),
        }
    }
}

impl RunConfig {
    /// Apply every field the layer sets
    pub fn overlay(mut self, settings: &Settings) -> Self {
        if let Some(v) = settings.max_iterations {
            self.max_iterations = v;
        }
        if let Some(v) = settings.max_steps {
            self.max_steps = v;
        }
        if let Some(v) = settings.node_retries {
            self.node_retries = v;
        }

        let adapter = &mut self.adapter;
        if let Some(v) = settings.max_tool_steps {
            adapter.max_tool_steps = v;
        }
        if let Some(v) = settings.structured_retries {
            adapter.structured_retries = v;
        }
        if let Some(v) = settings.transient_retries {
            adapter.transient_retries = v;
        }
        if let Some(v) = settings.max_concurrent_llm {
            adapter.max_concurrent = v.max(1);
        }
        if let Some(v) = settings.llm_timeout_secs {
            adapter.llm_timeout_secs = v;
        }
        if let Some(v) = settings.tool_timeout_secs {
            adapter.tool_timeout_secs = v;
        }
        if let Some(v) = settings.backoff_initial_ms {
            adapter.backoff_initial_ms = v;
        }
        if let Some(v) = settings.backoff_max_ms {
            adapter.backoff_max_ms = v;
        }
        self
    }

    /// Resolve defaults < pipeline settings < command-line settings
    pub fn resolve(pipeline: &Settings, cli: &Settings) -> Self {
        let config = Self::default().overlay(pipeline).overlay(cli);
        log::debug!("Resolved run config: {:?}", config);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.node_retries, 0);
        assert_eq!(config.adapter.max_tool_steps, 10);
        assert_eq!(config.adapter.max_concurrent, 8);
    }

    #[test]
    fn test_precedence() {
        let pipeline: Settings = serde_yaml::from_str(
            "max_iterations: 5\nmax_steps: 40\nllm_timeout_secs: 30\n",
        )
        .unwrap();
        let cli = Settings {
            max_iterations: Some(1),
            max_concurrent_llm: Some(2),
            ..Default::default()
        };

        let config = RunConfig::resolve(&pipeline, &cli);
        assert_eq!(config.max_iterations, 1);
        assert_eq!(config.max_steps, 40);
        assert_eq!(config.adapter.llm_timeout_secs, 30);
        assert_eq!(config.adapter.max_concurrent, 2);
        assert_eq!(config.adapter.tool_timeout_secs, 60);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = RunConfig::default().overlay(&Settings {
            max_concurrent_llm: Some(0),
            ..Default::default()
        });
        assert_eq!(config.adapter.max_concurrent, 1);
    }

    #[test]
    fn test_unknown_setting_is_rejected() {
        let result: Result<Settings, _> = serde_yaml::from_str("max_iterationz: 2\n");
        assert!(result.is_err());
    }
}
