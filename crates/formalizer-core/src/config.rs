//! Run configuration threaded through every driver constructor.
//!
//! Every section derives `Default` and uses `#[serde(default)]`, so a TOML
//! file only needs the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Knobs for one formalization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub planner: PlannerConfig,
    pub synthesis: SynthesisConfig,
    pub alignment: AlignmentConfig,
    /// Upper bound for any single collaborator call.
    pub call_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            planner: PlannerConfig::default(),
            synthesis: SynthesisConfig::default(),
            alignment: AlignmentConfig::default(),
            call_timeout_secs: 120,
        }
    }
}

/// Stage 1: grounding and decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Concepts at this depth or deeper are never expanded.
    pub max_depth: u32,
    /// Hard cap on the number of concepts in a graph.
    pub max_nodes: usize,
    /// A search hit is accepted when its distance is at most this value.
    pub acceptance_threshold: f64,
    /// Number of hits requested per query.
    pub search_results: usize,
    /// Extra model calls allowed after a malformed decomposition.
    pub expansion_retries: u32,
    /// Skip grounding for the root and always expand it.
    pub decompose_root: bool,
    /// Ask the model to confirm a search hit before grounding.
    pub confirm_with_model: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            max_depth: 4,
            max_nodes: 32,
            acceptance_threshold: 0.35,
            search_results: 20,
            expansion_retries: 1,
            decompose_root: false,
            confirm_with_model: false,
        }
    }
}

/// Stage 2: the per-concept reflection loop and assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub max_attempts: u32,
    /// Consecutive collaborator failures tolerated before a concept fails.
    pub collaborator_retry_budget: u32,
    /// Wall-clock budget per concept; `None` means attempts are the only bound.
    pub node_time_budget_secs: Option<u64>,
    /// Diagnostics fed back to the model are truncated to this many chars.
    pub diagnostic_char_limit: usize,
    pub base_imports: Vec<String>,
    /// Emit a comment line for each grounded concept in the artifact.
    pub annotate_grounded: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        SynthesisConfig {
            max_attempts: 16,
            collaborator_retry_budget: 3,
            node_time_budget_secs: None,
            diagnostic_char_limit: 500,
            base_imports: vec!["import Mathlib".to_string()],
            annotate_grounded: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Back-translate and judge the finished artifact.
    pub enabled: bool,
    /// Judge the root's first compilable-looking candidate against the
    /// statement before compiling it; a `level_3` verdict rejects it.
    pub precheck_root: bool,
}

impl RunConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn node_time_budget(&self) -> Option<Duration> {
        self.synthesis.node_time_budget_secs.map(Duration::from_secs)
    }

    /// Rejects values that would make a run meaningless or unbounded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reject = |field: &'static str, reason: &str| {
            Err(ConfigError {
                field,
                reason: reason.to_string(),
            })
        };

        if self.planner.max_nodes == 0 {
            return reject("planner.max_nodes", "must be at least 1");
        }
        if !self.planner.acceptance_threshold.is_finite() || self.planner.acceptance_threshold < 0.0
        {
            return reject(
                "planner.acceptance_threshold",
                "must be a non-negative number",
            );
        }
        if self.planner.search_results == 0 {
            return reject("planner.search_results", "must be at least 1");
        }
        if self.synthesis.max_attempts == 0 {
            return reject("synthesis.max_attempts", "must be at least 1");
        }
        if self.synthesis.collaborator_retry_budget == 0 {
            return reject("synthesis.collaborator_retry_budget", "must be at least 1");
        }
        if self.synthesis.node_time_budget_secs == Some(0) {
            return reject("synthesis.node_time_budget_secs", "must be positive when set");
        }
        if self.synthesis.diagnostic_char_limit == 0 {
            return reject("synthesis.diagnostic_char_limit", "must be at least 1");
        }
        if self.call_timeout_secs == 0 {
            return reject("call_timeout_secs", "must be at least 1");
        }
        Ok(())
    }
}
