//! Distance-based relevance and hybrid rank fusion

use serde::{Deserialize, Serialize};
use trellis_core::{Error, Node, RankedNode, Result};

/// Relevance of a node discovered at `distance` hops from an entry point:
/// `1 / (distance + 1)`. BFS reports the shortest distance over all paths,
/// so a node close to any entry point keeps the maximum score.
pub fn structural_score(distance: u32) -> f32 {
    1.0 / (distance as f32 + 1.0)
}

/// Weights fusing structural and semantic relevance. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankWeights {
    pub graph: f32,
    pub semantic: f32,
}

impl Default for RankWeights {
    fn default() -> Self {
        RankWeights {
            graph: 0.4,
            semantic: 0.6,
        }
    }
}

impl RankWeights {
    pub fn validate(&self) -> Result<()> {
        if !self.graph.is_finite() || !self.semantic.is_finite() || self.graph < 0.0 || self.semantic < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "rank weights must be non-negative, got {}/{}",
                self.graph, self.semantic
            )));
        }
        if (self.graph + self.semantic - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidArgument(format!(
                "rank weights must sum to 1.0, got {}/{}",
                self.graph, self.semantic
            )));
        }
        Ok(())
    }
}

/// One candidate entering rank fusion.
#[derive(Debug, Clone)]
pub struct RankCandidate {
    pub node: Node,
    /// Shortest traversal distance, or None when only the semantic side
    /// knows about this node.
    pub distance: Option<u32>,
    pub semantic_score: f32,
    pub token_count: u32,
}

/// Fuses structural and semantic scores into one ranking.
pub struct HybridRanker {
    weights: RankWeights,
    structural_floor: f32,
}

impl HybridRanker {
    pub fn new(weights: RankWeights, structural_floor: f32) -> Result<Self> {
        weights.validate()?;
        if !(0.0..=1.0).contains(&structural_floor) {
            return Err(Error::InvalidArgument(format!(
                "structural floor must be within [0, 1], got {structural_floor}"
            )));
        }
        Ok(HybridRanker {
            weights,
            structural_floor,
        })
    }

    /// Combine scores and sort descending; ties break by ascending fqn so
    /// identical inputs always produce identical output.
    pub fn rank(&self, candidates: Vec<RankCandidate>) -> Vec<RankedNode> {
        let mut ranked: Vec<RankedNode> = candidates
            .into_iter()
            .map(|candidate| {
                let structural = candidate
                    .distance
                    .map(structural_score)
                    .unwrap_or(self.structural_floor);
                let semantic = candidate.semantic_score.clamp(0.0, 1.0);
                RankedNode {
                    combined_score: self.weights.graph * structural + self.weights.semantic * semantic,
                    structural_score: structural,
                    semantic_score: semantic,
                    token_count: candidate.token_count,
                    node: candidate.node,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| a.node.fqn.cmp(&b.node.fqn))
        });
        ranked
    }
}
