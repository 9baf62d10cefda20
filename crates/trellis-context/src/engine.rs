//! Context assembly pipeline.
//!
//! Resolution -> traversal -> structural scoring -> externally supplied
//! semantic scores -> hybrid rank -> budget allocation -> summarization.
//! Collaborators are injected at construction; the pipeline itself is pure
//! and reads one consistent snapshot for the whole request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::Serialize;
use tracing::{debug, info};

use trellis_core::{Direction, Error, GraphIndex, Node, NodeKind, Result};

use crate::budget::{AllocatorLimits, BudgetAllocator, Strategy};
use crate::cache::{CacheStats, RequestKey, ResultCache};
use crate::config::AssemblyConfig;
use crate::score::{HybridRanker, RankCandidate};
use crate::summarize::{ContentSummarizer, DetailLevel};
use crate::tokens::TokenCounter;

/// Externally supplied similarity collaborator. The engine only consumes
/// scores; it never computes similarity itself.
#[async_trait]
pub trait SemanticScorer: Send + Sync {
    /// Cosine-similarity-like relevance of one node to the task, in [0, 1].
    async fn score(&self, task: &str, node: &Node) -> f32;

    /// Fqns the semantic side considers relevant regardless of graph
    /// distance. Defaults to none.
    async fn suggest(&self, _task: &str, _limit: usize) -> Vec<String> {
        Vec::new()
    }
}

/// Scorer that knows nothing; every node scores zero.
pub struct NullScorer;

#[async_trait]
impl SemanticScorer for NullScorer {
    async fn score(&self, _task: &str, _node: &Node) -> f32 {
        0.0
    }
}

/// Scores read from a precomputed map, e.g. a file written by an
/// embedding service.
pub struct ProvidedScores {
    scores: HashMap<String, f32>,
}

impl ProvidedScores {
    pub fn new(scores: HashMap<String, f32>) -> Self {
        ProvidedScores { scores }
    }
}

#[async_trait]
impl SemanticScorer for ProvidedScores {
    async fn score(&self, _task: &str, node: &Node) -> f32 {
        self.scores.get(&node.fqn).copied().unwrap_or(0.0)
    }

    async fn suggest(&self, _task: &str, limit: usize) -> Vec<String> {
        let mut entries: Vec<(&String, f32)> =
            self.scores.iter().map(|(fqn, s)| (fqn, *s)).collect();
        entries.sort_by(|(fa, sa), (fb, sb)| sb.total_cmp(sa).then_with(|| fa.cmp(fb)));
        entries.into_iter().take(limit).map(|(fqn, _)| fqn.clone()).collect()
    }
}

/// One assembly request.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub repo: String,
    pub entry_points: Vec<String>,
    pub task: String,
    pub max_tokens: u32,
    pub reserve: u32,
    pub depth: u32,
    pub direction: Direction,
    pub model: String,
    pub strategy: Strategy,
}

/// One selected node, summarized for delivery. Path and line range are
/// always present, whatever the detail level.
#[derive(Debug, Clone, Serialize)]
pub struct ContextNode {
    pub fqn: String,
    pub kind: NodeKind,
    pub path: PathBuf,
    pub line_range: Option<(u32, u32)>,
    pub structural_score: f32,
    pub semantic_score: f32,
    pub combined_score: f32,
    pub level: DetailLevel,
    pub token_count: u32,
    pub text: String,
}

/// The assembled context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextResult {
    pub nodes: Vec<ContextNode>,
    pub total_tokens: u32,
    pub budget_used_pct: f32,
    pub nodes_included: usize,
    pub nodes_excluded: usize,
    pub nodes_truncated: usize,
    pub strategy_used: Strategy,
    pub graph_version: u64,
    pub generation_time_ms: u64,
}

/// Assembles budget-bounded context slices from graph snapshots.
pub struct ContextEngine {
    scorer: Arc<dyn SemanticScorer>,
    config: AssemblyConfig,
    counter: TokenCounter,
    cache: ResultCache,
}

impl ContextEngine {
    pub fn new(scorer: Arc<dyn SemanticScorer>, config: AssemblyConfig) -> Result<Self> {
        config.validate()?;
        let cache = ResultCache::new(Duration::from_secs(config.cache_ttl_secs));
        Ok(ContextEngine {
            scorer,
            config,
            counter: TokenCounter::new(),
            cache,
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Assemble a context slice against one consistent snapshot.
    pub async fn assemble_context(
        &self,
        snapshot: &GraphIndex,
        request: &ContextRequest,
    ) -> Result<ContextResult> {
        let started = Instant::now();
        trellis_core::validate_depth(request.depth)?;

        let key = RequestKey {
            repo: request.repo.clone(),
            task: request.task.clone(),
            entry_points: request.entry_points.clone(),
            depth: request.depth,
            direction: request.direction,
            max_tokens: request.max_tokens,
            reserve: request.reserve,
            model: request.model.clone(),
            strategy: request.strategy,
            version: snapshot.version(),
        };
        if let Some(cached) = self.cache.get(&key) {
            debug!(repo = %request.repo, version = %snapshot.version(), "context cache hit");
            return Ok(cached);
        }

        let entry_fqns = self.resolve_entry_points(snapshot, &request.entry_points)?;
        let reached = snapshot.traverse(&entry_fqns, request.depth, request.direction)?;
        debug!(
            repo = %request.repo,
            reached = reached.len(),
            "traversal complete"
        );

        // Structurally reached nodes, then candidates only the semantic
        // side knows about (ranked with the structural floor).
        let mut distances: HashMap<String, Option<u32>> = reached
            .iter()
            .map(|(node, dist)| (node.fqn.clone(), Some(*dist)))
            .collect();
        let mut nodes: Vec<Node> = reached.into_iter().map(|(node, _)| node).collect();
        for fqn in self
            .scorer
            .suggest(&request.task, self.config.semantic_candidates)
            .await
        {
            if distances.contains_key(&fqn) {
                continue;
            }
            if let Some(node) = snapshot.get_node(&fqn) {
                distances.insert(fqn, None);
                nodes.push(node.clone());
            }
        }

        let contents: Vec<&str> = nodes.iter().map(|n| n.content.as_str()).collect();
        let counts = self.counter.count_batch(&contents, &request.model);

        let mut candidates = Vec::with_capacity(nodes.len());
        for (node, token_count) in nodes.into_iter().zip(counts) {
            let semantic_score = self.scorer.score(&request.task, &node).await;
            candidates.push(RankCandidate {
                distance: distances[&node.fqn],
                semantic_score,
                token_count,
                node,
            });
        }

        let ranker = HybridRanker::new(self.config.weights, self.config.structural_floor)?;
        let ranked = ranker.rank(candidates);

        let summarizer = ContentSummarizer::new(&self.counter, &request.model);
        let limits = AllocatorLimits {
            min_useful_tokens: self.config.min_useful_tokens,
            low_variance_threshold: self.config.low_variance_threshold,
            knapsack_scale_threshold: self.config.knapsack_scale_threshold,
            knapsack_max_nodes: self.config.knapsack_max_nodes,
        };
        let allocator = BudgetAllocator::new(&summarizer, limits);
        let allocation =
            allocator.allocate(ranked, request.max_tokens, request.strategy, request.reserve);

        let mut nodes_out = Vec::with_capacity(allocation.selected.len());
        let mut total_tokens = 0u32;
        for selected in &allocation.selected {
            let summary = summarizer.summarize(&selected.node, selected.token_count);
            total_tokens += summary.token_count;
            nodes_out.push(ContextNode {
                fqn: selected.node.fqn.clone(),
                kind: selected.node.kind,
                path: selected.node.path.clone(),
                line_range: selected.node.line_range,
                structural_score: selected.structural_score,
                semantic_score: selected.semantic_score,
                combined_score: selected.combined_score,
                level: summary.level,
                token_count: summary.token_count,
                text: summary.text,
            });
        }

        let budget = request.max_tokens.saturating_sub(request.reserve);
        let result = ContextResult {
            nodes: nodes_out,
            total_tokens,
            budget_used_pct: if budget == 0 {
                0.0
            } else {
                total_tokens as f32 * 100.0 / budget as f32
            },
            nodes_included: allocation.nodes_included,
            nodes_excluded: allocation.nodes_excluded,
            nodes_truncated: allocation.nodes_truncated,
            strategy_used: allocation.strategy_used,
            graph_version: snapshot.version().0,
            generation_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            repo = %request.repo,
            included = result.nodes_included,
            tokens = result.total_tokens,
            strategy = %result.strategy_used,
            "context assembled"
        );
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    /// Resolve each entry point to node fqns: first as an fqn, then as a
    /// file path. An unresolvable entry is a `NotFound` carrying the
    /// closest known fqn as a hint.
    fn resolve_entry_points(
        &self,
        snapshot: &GraphIndex,
        entry_points: &[String],
    ) -> Result<Vec<String>> {
        if entry_points.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one entry point is required".to_string(),
            ));
        }
        let mut resolved = Vec::new();
        for entry in entry_points {
            if snapshot.contains(entry) {
                resolved.push(entry.clone());
                continue;
            }
            let in_file = snapshot.nodes_in_file(Path::new(entry));
            if !in_file.is_empty() {
                resolved.extend(in_file.iter().map(|node| node.fqn.clone()));
                continue;
            }
            let message = match closest_fqn(snapshot, entry) {
                Some(hint) => format!(
                    "entry point '{entry}' does not resolve to any node (closest match: '{hint}')"
                ),
                None => format!("entry point '{entry}' does not resolve to any node"),
            };
            return Err(Error::NotFound(message));
        }
        Ok(resolved)
    }
}

/// Best fuzzy match for an unresolvable entry point, for the error hint.
fn closest_fqn(snapshot: &GraphIndex, query: &str) -> Option<String> {
    let matcher = SkimMatcherV2::default();
    snapshot
        .all_nodes()
        .filter_map(|node| {
            matcher
                .fuzzy_match(&node.fqn, query)
                .map(|score| (score, node.fqn.clone()))
        })
        .max_by(|(sa, fa), (sb, fb)| sa.cmp(sb).then_with(|| fb.cmp(fa)))
        .map(|(_, fqn)| fqn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use trellis_core::{Edge, EdgeKind};

    fn func(fqn: &str, path: &str, content_tokens: usize) -> Node {
        Node {
            fqn: fqn.to_string(),
            kind: NodeKind::Function,
            path: PathBuf::from(path),
            line_range: Some((1, 10)),
            signature: Some(format!("def {fqn}():")),
            docstring: None,
            content: "x".repeat(content_tokens * 4),
        }
    }

    fn calls(source: &str, target: &str) -> Edge {
        Edge {
            source_fqn: source.to_string(),
            target_fqn: target.to_string(),
            kind: EdgeKind::Calls,
            line: None,
        }
    }

    fn snapshot() -> GraphIndex {
        GraphIndex::from_parts(
            vec![
                func("api::handler", "src/api.py", 100),
                func("api::helper", "src/api.py", 80),
                func("db::query", "src/db.py", 120),
                func("util::log", "src/util.py", 40),
            ],
            vec![
                calls("api::handler", "api::helper"),
                calls("api::handler", "db::query"),
                calls("db::query", "util::log"),
            ],
        )
    }

    fn request(entry: &str) -> ContextRequest {
        ContextRequest {
            repo: "demo".into(),
            entry_points: vec![entry.to_string()],
            task: "speed up the query path".into(),
            max_tokens: 2000,
            reserve: 0,
            depth: 3,
            direction: Direction::Outgoing,
            model: "gpt-4".into(),
            strategy: Strategy::Greedy,
        }
    }

    fn engine() -> ContextEngine {
        ContextEngine::new(Arc::new(NullScorer), AssemblyConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn assembles_from_an_fqn_entry_point() {
        let result = engine()
            .assemble_context(&snapshot(), &request("api::handler"))
            .await
            .unwrap();
        assert_eq!(result.nodes_included, 4);
        assert_eq!(result.nodes[0].fqn, "api::handler"); // distance 0 ranks first
        assert!(result.total_tokens <= 2000);
        assert_eq!(result.strategy_used, Strategy::Greedy);
    }

    #[tokio::test]
    async fn resolves_file_paths_to_their_nodes() {
        let result = engine()
            .assemble_context(&snapshot(), &request("src/api.py"))
            .await
            .unwrap();
        let fqns: Vec<&str> = result.nodes.iter().map(|n| n.fqn.as_str()).collect();
        assert!(fqns.contains(&"api::handler"));
        assert!(fqns.contains(&"api::helper"));
    }

    #[tokio::test]
    async fn unknown_entry_point_is_not_found_with_hint() {
        let err = engine()
            .assemble_context(&snapshot(), &request("api::handlr"))
            .await
            .unwrap_err();
        match err {
            Error::NotFound(message) => assert!(message.contains("api::handler")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_entry_points_are_invalid() {
        let mut req = request("api::handler");
        req.entry_points.clear();
        let err = engine().assemble_context(&snapshot(), &req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn depth_is_validated_before_any_work() {
        let mut req = request("api::handler");
        req.depth = 6;
        let err = engine().assemble_context(&snapshot(), &req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn semantic_suggestions_join_the_candidate_set() {
        // util::log is 3 hops out but depth 1 will not reach it; the
        // semantic side still surfaces it.
        let mut scores = HashMap::new();
        scores.insert("util::log".to_string(), 0.95_f32);
        let engine = ContextEngine::new(
            Arc::new(ProvidedScores::new(scores)),
            AssemblyConfig::default(),
        )
        .unwrap();

        let mut req = request("api::handler");
        req.depth = 1;
        let result = engine.assemble_context(&snapshot(), &req).await.unwrap();
        let log = result.nodes.iter().find(|n| n.fqn == "util::log").unwrap();
        assert_eq!(log.structural_score, 0.1); // the configured floor
        assert_eq!(log.semantic_score, 0.95);
    }

    #[tokio::test]
    async fn identical_requests_hit_the_cache() {
        let engine = engine();
        let snap = snapshot();
        let req = request("api::handler");

        let first = engine.assemble_context(&snap, &req).await.unwrap();
        let second = engine.assemble_context(&snap, &req).await.unwrap();
        assert_eq!(first.total_tokens, second.total_tokens);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn version_bump_bypasses_the_cache() {
        let engine = engine();
        let mut snap = snapshot();
        let req = request("api::handler");

        engine.assemble_context(&snap, &req).await.unwrap();
        snap.set_version(snap.version().next());
        engine.assemble_context(&snap, &req).await.unwrap();
        assert_eq!(engine.cache_stats().hits, 0);
        assert_eq!(engine.cache_stats().misses, 2);
    }

    #[tokio::test]
    async fn results_are_deterministic() {
        let engine_a = engine();
        let engine_b = engine();
        let snap = snapshot();
        let req = request("api::handler");

        let a = engine_a.assemble_context(&snap, &req).await.unwrap();
        let b = engine_b.assemble_context(&snap, &req).await.unwrap();
        let fqns_a: Vec<&str> = a.nodes.iter().map(|n| n.fqn.as_str()).collect();
        let fqns_b: Vec<&str> = b.nodes.iter().map(|n| n.fqn.as_str()).collect();
        assert_eq!(fqns_a, fqns_b);
        assert_eq!(a.total_tokens, b.total_tokens);
    }
}
