//! Token-budget allocation strategies.
//!
//! Every strategy honors the same contract: the selected total never
//! exceeds `max_tokens - reserve`, and identical inputs always produce
//! identical output. A small budget degrades the result, it never fails.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use trellis_core::{Error, RankedNode};

use crate::summarize::ContentSummarizer;

/// Closed set of built-in allocation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Greedy,
    Proportional,
    Knapsack,
    Adaptive,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(Strategy::Greedy),
            "proportional" => Ok(Strategy::Proportional),
            "knapsack" => Ok(Strategy::Knapsack),
            "adaptive" => Ok(Strategy::Adaptive),
            other => Err(Error::InvalidArgument(format!("unknown strategy: {other}"))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Greedy => "greedy",
            Strategy::Proportional => "proportional",
            Strategy::Knapsack => "knapsack",
            Strategy::Adaptive => "adaptive",
        };
        write!(f, "{name}")
    }
}

/// Outcome of one allocation pass.
///
/// `strategy_used` reports the strategy that actually ran, so an Adaptive
/// request shows which concrete strategy it resolved to.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationResult {
    pub selected: Vec<RankedNode>,
    pub total_tokens: u32,
    pub budget_used_pct: f32,
    pub nodes_included: usize,
    pub nodes_excluded: usize,
    pub nodes_truncated: usize,
    pub strategy_used: Strategy,
}

/// Tuning knobs for allocation, sourced from `AssemblyConfig`.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorLimits {
    /// Smallest truncation allowance worth keeping under Proportional.
    pub min_useful_tokens: u32,
    /// Score variance below which Adaptive prefers Proportional.
    pub low_variance_threshold: f32,
    /// Budget above which Knapsack integer-scales before solving.
    pub knapsack_scale_threshold: u32,
    /// Node count above which Adaptive refuses Knapsack.
    pub knapsack_max_nodes: usize,
}

impl Default for AllocatorLimits {
    fn default() -> Self {
        AllocatorLimits {
            min_useful_tokens: 100,
            low_variance_threshold: 0.01,
            knapsack_scale_threshold: 10_000,
            knapsack_max_nodes: 500,
        }
    }
}

#[derive(Clone, Copy)]
enum Resolved {
    Greedy,
    Proportional,
    Knapsack,
}

/// Selects nodes under a hard token cap.
pub struct BudgetAllocator<'a> {
    summarizer: &'a ContentSummarizer<'a>,
    limits: AllocatorLimits,
}

impl<'a> BudgetAllocator<'a> {
    pub fn new(summarizer: &'a ContentSummarizer<'a>, limits: AllocatorLimits) -> Self {
        BudgetAllocator { summarizer, limits }
    }

    /// Allocate `nodes` into `max_tokens - reserve`. For truncated nodes the
    /// returned `token_count` is the achievable summarized size, so the
    /// reported totals are exact.
    pub fn allocate(
        &self,
        mut nodes: Vec<RankedNode>,
        max_tokens: u32,
        strategy: Strategy,
        reserve: u32,
    ) -> AllocationResult {
        let budget = max_tokens.saturating_sub(reserve);
        nodes.sort_by(|a, b| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| a.node.fqn.cmp(&b.node.fqn))
        });
        let candidate_count = nodes.len();

        let resolved = match strategy {
            Strategy::Greedy => Resolved::Greedy,
            Strategy::Proportional => Resolved::Proportional,
            Strategy::Knapsack => Resolved::Knapsack,
            Strategy::Adaptive => self.pick_adaptive(&nodes, budget),
        };

        let (selected, truncated, used) = match resolved {
            Resolved::Greedy => self.greedy(nodes, budget),
            Resolved::Proportional => self.proportional(nodes, budget),
            Resolved::Knapsack => self.knapsack(nodes, budget),
        };

        AllocationResult {
            nodes_included: selected.len(),
            nodes_excluded: candidate_count - selected.len(),
            nodes_truncated: truncated,
            total_tokens: used,
            budget_used_pct: if budget == 0 {
                0.0
            } else {
                used as f32 * 100.0 / budget as f32
            },
            strategy_used: match resolved {
                Resolved::Greedy => Strategy::Greedy,
                Resolved::Proportional => Strategy::Proportional,
                Resolved::Knapsack => Strategy::Knapsack,
            },
            selected,
        }
    }

    fn pick_adaptive(&self, nodes: &[RankedNode], budget: u32) -> Resolved {
        let demand: u64 = nodes.iter().map(|n| n.token_count as u64).sum();
        if demand <= budget as u64 {
            return Resolved::Greedy;
        }
        if nodes.len() > self.limits.knapsack_max_nodes {
            return Resolved::Greedy;
        }
        if score_variance(nodes) < self.limits.low_variance_threshold {
            return Resolved::Proportional;
        }
        Resolved::Knapsack
    }

    /// Accept by descending score while the cumulative total fits. When the
    /// top node alone exceeds a still-empty budget, degrade it through the
    /// summarizer instead of returning nothing.
    fn greedy(&self, nodes: Vec<RankedNode>, budget: u32) -> (Vec<RankedNode>, usize, u32) {
        let mut selected = Vec::new();
        let mut truncated = 0;
        let mut used = 0u32;
        for mut node in nodes {
            if used.saturating_add(node.token_count) <= budget {
                used += node.token_count;
                selected.push(node);
            } else if selected.is_empty() && budget > 0 {
                let summary = self.summarizer.summarize(&node.node, budget);
                node.token_count = summary.token_count;
                used += node.token_count;
                truncated += 1;
                selected.push(node);
            }
        }
        (selected, truncated, used)
    }

    /// Give each node an allowance proportional to its share of the total
    /// score. Whole nodes pass untouched; oversized nodes truncate to their
    /// allowance when it is large enough to be useful, else drop out.
    fn proportional(&self, nodes: Vec<RankedNode>, budget: u32) -> (Vec<RankedNode>, usize, u32) {
        let score_sum: f32 = nodes.iter().map(|n| n.combined_score).sum();
        if score_sum <= 0.0 || budget == 0 {
            return (Vec::new(), 0, 0);
        }
        let mut selected = Vec::new();
        let mut truncated = 0;
        let mut used = 0u32;
        for mut node in nodes {
            let allowance = (budget as f32 * (node.combined_score / score_sum)).floor() as u32;
            if node.token_count <= allowance {
                used += node.token_count;
                selected.push(node);
            } else if allowance >= self.limits.min_useful_tokens {
                let summary = self.summarizer.summarize(&node.node, allowance);
                node.token_count = summary.token_count;
                used += node.token_count;
                truncated += 1;
                selected.push(node);
            }
        }
        (selected, truncated, used)
    }

    /// Exact 0/1 optimization of total score under the budget via dynamic
    /// programming. Budgets above the scale threshold are integer-scaled
    /// down first (weights rounded up, so a selection can never overshoot
    /// the real budget); the scaling is lossy and may leave slack.
    fn knapsack(&self, nodes: Vec<RankedNode>, budget: u32) -> (Vec<RankedNode>, usize, u32) {
        if budget == 0 || nodes.is_empty() {
            return (Vec::new(), 0, 0);
        }
        let scale = if budget > self.limits.knapsack_scale_threshold {
            budget.div_ceil(self.limits.knapsack_scale_threshold)
        } else {
            1
        };
        let cap = (budget / scale) as usize;
        let weights: Vec<usize> = nodes
            .iter()
            .map(|n| n.token_count.div_ceil(scale) as usize)
            .collect();
        // Integer values keep the DP free of float comparisons.
        let values: Vec<u64> = nodes
            .iter()
            .map(|n| (n.combined_score * 10_000.0).round() as u64)
            .collect();

        let n = nodes.len();
        let mut best = vec![0u64; cap + 1];
        let mut keep = vec![vec![false; cap + 1]; n];
        for i in 0..n {
            let weight = weights[i];
            if weight > cap {
                continue;
            }
            for b in (weight..=cap).rev() {
                let with_item = best[b - weight] + values[i];
                if with_item > best[b] {
                    best[b] = with_item;
                    keep[i][b] = true;
                }
            }
        }

        let mut chosen = vec![false; n];
        let mut b = cap;
        for i in (0..n).rev() {
            if keep[i][b] {
                chosen[i] = true;
                b -= weights[i];
            }
        }

        let mut used = 0u32;
        let selected: Vec<RankedNode> = nodes
            .into_iter()
            .zip(chosen)
            .filter_map(|(node, take)| take.then_some(node))
            .inspect(|node| used += node.token_count)
            .collect();
        (selected, 0, used)
    }
}

fn score_variance(nodes: &[RankedNode]) -> f32 {
    if nodes.is_empty() {
        return 0.0;
    }
    let mean = nodes.iter().map(|n| n.combined_score).sum::<f32>() / nodes.len() as f32;
    nodes
        .iter()
        .map(|n| (n.combined_score - mean).powi(2))
        .sum::<f32>()
        / nodes.len() as f32
}
