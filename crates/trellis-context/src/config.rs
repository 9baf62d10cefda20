//! Assembly engine configuration

use serde::{Deserialize, Serialize};
use trellis_core::{Error, Result};

use crate::score::RankWeights;

/// Tuning for the assembly pipeline. Every field has a sensible default,
/// so a config file only needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Fusion weights for structural vs semantic relevance.
    pub weights: RankWeights,
    /// Structural score assigned to nodes known only semantically.
    pub structural_floor: f32,
    /// How many extra candidates to request from the semantic collaborator.
    pub semantic_candidates: usize,
    /// Smallest truncation allowance worth keeping under Proportional.
    pub min_useful_tokens: u32,
    /// Score variance below which Adaptive prefers Proportional.
    pub low_variance_threshold: f32,
    /// Budget above which Knapsack integer-scales before solving.
    pub knapsack_scale_threshold: u32,
    /// Node count above which Adaptive refuses Knapsack.
    pub knapsack_max_nodes: usize,
    /// Result cache time-to-live, seconds.
    pub cache_ttl_secs: u64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        AssemblyConfig {
            weights: RankWeights::default(),
            structural_floor: 0.1,
            semantic_candidates: 10,
            min_useful_tokens: 100,
            low_variance_threshold: 0.01,
            knapsack_scale_threshold: 10_000,
            knapsack_max_nodes: 500,
            cache_ttl_secs: 30,
        }
    }
}

impl AssemblyConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.structural_floor) {
            return Err(Error::InvalidArgument(format!(
                "structural_floor must be within [0, 1], got {}",
                self.structural_floor
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML config document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AssemblyConfig = toml::from_str(text)
            .map_err(|e| Error::InvalidArgument(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
