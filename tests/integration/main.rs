//! Integration tests for Trellis
//!
//! End-to-end checks across the core, context, and sync crates, including
//! the documented allocation and sync scenarios.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use trellis_context::{
    AllocatorLimits, AssemblyConfig, BudgetAllocator, ContentSummarizer, ContextEngine,
    ContextRequest, DetailLevel, OutputFormat, ProvidedScores, Strategy, TokenCounter, render,
};
use trellis_core::{
    ChangeKind, Direction, Edge, EdgeKind, Error, FileChange, GraphIndex, Node, NodeKind,
    RankedNode,
};
use trellis_sync::{FileAnalysis, GraphUpdater, InMemoryStorage, MapAnalyzer, NoopIndex};

fn node(fqn: &str, path: &str, content_tokens: usize) -> Node {
    Node {
        fqn: fqn.to_string(),
        kind: NodeKind::Function,
        path: PathBuf::from(path),
        line_range: Some((1, 20)),
        signature: Some(format!("def {fqn}():")),
        docstring: None,
        content: "x".repeat(content_tokens * 4),
    }
}

fn edge(source: &str, target: &str) -> Edge {
    Edge {
        source_fqn: source.to_string(),
        target_fqn: target.to_string(),
        kind: EdgeKind::Calls,
        line: None,
    }
}

fn ranked(fqn: &str, score: f32, tokens: u32) -> RankedNode {
    RankedNode {
        node: node(fqn, "src/mod.py", tokens as usize),
        structural_score: score,
        semantic_score: score,
        combined_score: score,
        token_count: tokens,
    }
}

fn allocate(nodes: Vec<RankedNode>, max_tokens: u32, strategy: Strategy) -> trellis_context::AllocationResult {
    let counter = TokenCounter::new();
    let summarizer = ContentSummarizer::new(&counter, "gpt-4");
    let allocator = BudgetAllocator::new(&summarizer, AllocatorLimits::default());
    allocator.allocate(nodes, max_tokens, strategy, 0)
}

// ── Allocation scenarios ────────────────────────────────────────────────

#[test]
fn scenario_a_greedy_takes_only_the_top_node() {
    let result = allocate(
        vec![ranked("a", 0.9, 400), ranked("b", 0.5, 300)],
        500,
        Strategy::Greedy,
    );
    let fqns: Vec<&str> = result.selected.iter().map(|r| r.node.fqn.as_str()).collect();
    assert_eq!(fqns, vec!["a"]);
    assert_eq!(result.total_tokens, 400);
    assert_eq!(result.budget_used_pct, 80.0);
}

#[test]
fn scenario_b_greedy_takes_both_at_eight_hundred() {
    let result = allocate(
        vec![ranked("a", 0.9, 400), ranked("b", 0.5, 300)],
        800,
        Strategy::Greedy,
    );
    let fqns: Vec<&str> = result.selected.iter().map(|r| r.node.fqn.as_str()).collect();
    assert_eq!(fqns, vec!["a", "b"]);
    assert_eq!(result.total_tokens, 700);
}

#[test]
fn budget_invariant_holds_for_every_strategy() {
    let nodes = vec![
        ranked("a", 0.93, 700),
        ranked("b", 0.71, 650),
        ranked("c", 0.52, 420),
        ranked("d", 0.33, 380),
        ranked("e", 0.12, 90),
    ];
    for strategy in [
        Strategy::Greedy,
        Strategy::Proportional,
        Strategy::Knapsack,
        Strategy::Adaptive,
    ] {
        for (max_tokens, reserve) in [(1000u32, 0u32), (1000, 250), (120, 40), (50, 50)] {
            let counter = TokenCounter::new();
            let summarizer = ContentSummarizer::new(&counter, "gpt-4");
            let allocator = BudgetAllocator::new(&summarizer, AllocatorLimits::default());
            let result = allocator.allocate(nodes.clone(), max_tokens, strategy, reserve);
            assert!(
                result.total_tokens <= max_tokens - reserve,
                "{strategy} broke the cap at {max_tokens}/{reserve}"
            );
        }
    }
}

#[test]
fn knapsack_total_score_dominates_greedy() {
    let nodes = vec![
        ranked("first", 0.6, 300),
        ranked("second", 0.5, 250),
        ranked("third", 0.5, 250),
    ];
    let greedy = allocate(nodes.clone(), 500, Strategy::Greedy);
    let knapsack = allocate(nodes, 500, Strategy::Knapsack);

    let greedy_score: f32 = greedy.selected.iter().map(|r| r.combined_score).sum();
    let knapsack_score: f32 = knapsack.selected.iter().map(|r| r.combined_score).sum();
    assert!(knapsack_score >= greedy_score);
}

#[test]
fn full_detail_is_verbatim_whenever_it_fits() {
    let counter = TokenCounter::new();
    let summarizer = ContentSummarizer::new(&counter, "gpt-4");
    let sample = node("app::run", "src/app.py", 50);
    let tokens = counter.count(&sample.content, "gpt-4");

    let summary = summarizer.summarize(&sample, tokens);
    assert_eq!(summary.level, DetailLevel::Full);
    assert_eq!(summary.text, sample.content);

    let summary = summarizer.summarize(&sample, tokens + 100);
    assert_eq!(summary.level, DetailLevel::Full);
}

// ── Full pipeline ───────────────────────────────────────────────────────

fn demo_graph() -> GraphIndex {
    GraphIndex::from_parts(
        vec![
            node("api::serve", "src/api.py", 120),
            node("api::route", "src/api.py", 90),
            node("core::engine", "src/core.py", 200),
            node("core::model", "src/core.py", 150),
            node("util::trace", "src/util.py", 30),
        ],
        vec![
            edge("api::serve", "api::route"),
            edge("api::route", "core::engine"),
            edge("core::engine", "core::model"),
            edge("core::engine", "util::trace"),
        ],
    )
}

#[tokio::test]
async fn pipeline_assembles_deterministic_budgeted_context() {
    let mut scores = HashMap::new();
    scores.insert("core::engine".to_string(), 0.9_f32);
    scores.insert("core::model".to_string(), 0.7_f32);
    let engine = ContextEngine::new(
        Arc::new(ProvidedScores::new(scores)),
        AssemblyConfig::default(),
    )
    .unwrap();

    let request = ContextRequest {
        repo: "demo".to_string(),
        entry_points: vec!["api::serve".to_string()],
        task: "trace a request through the engine".to_string(),
        max_tokens: 400,
        reserve: 20,
        depth: 4,
        direction: Direction::Outgoing,
        model: "gpt-4".to_string(),
        strategy: Strategy::Adaptive,
    };

    let snapshot = demo_graph();
    let first = engine.assemble_context(&snapshot, &request).await.unwrap();
    assert!(first.total_tokens <= 380);
    assert!(first.nodes_included > 0);

    let second = engine.assemble_context(&snapshot, &request).await.unwrap();
    let fqns_first: Vec<&str> = first.nodes.iter().map(|n| n.fqn.as_str()).collect();
    let fqns_second: Vec<&str> = second.nodes.iter().map(|n| n.fqn.as_str()).collect();
    assert_eq!(fqns_first, fqns_second);
    assert_eq!(first.total_tokens, second.total_tokens);

    // Rendering is presentation only.
    let markdown = render(&first, OutputFormat::Markdown);
    for context_node in &first.nodes {
        assert!(markdown.contains(&context_node.fqn));
    }
    let structured = render(&first, OutputFormat::Structured);
    let value: serde_json::Value = serde_json::from_str(&structured).unwrap();
    assert_eq!(value["total_tokens"], first.total_tokens);
}

#[tokio::test]
async fn scenario_d_depth_six_fails_before_any_work() {
    let err = demo_graph()
        .traverse(&["api::serve".to_string()], 6, Direction::Outgoing)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

// ── Sync scenarios ──────────────────────────────────────────────────────

fn utils_graph() -> GraphIndex {
    // Three nodes owned by src/utils.py, five edges touching them.
    GraphIndex::from_parts(
        vec![
            node("utils::a", "src/utils.py", 10),
            node("utils::b", "src/utils.py", 10),
            node("utils::c", "src/utils.py", 10),
            node("main::run", "src/main.py", 10),
        ],
        vec![
            edge("utils::a", "utils::b"),
            edge("utils::b", "utils::c"),
            edge("utils::c", "utils::a"),
            edge("main::run", "utils::a"),
            edge("utils::b", "main::run"),
        ],
    )
}

#[tokio::test]
async fn scenario_c_file_deletion_leaves_no_dangling_edges() {
    let updater = GraphUpdater::new(
        Arc::new(MapAnalyzer::new(HashMap::new())),
        Arc::new(InMemoryStorage::new()),
        Arc::new(NoopIndex),
    );
    updater.register_repo("demo", utils_graph());

    let report = updater
        .apply_changes(
            "demo",
            &[FileChange {
                path: PathBuf::from("src/utils.py"),
                change: ChangeKind::Deleted,
                old_path: None,
            }],
            None,
        )
        .await
        .unwrap();
    assert_eq!(report.nodes_deleted, 3);

    let snapshot = updater.snapshot("demo").await.unwrap();
    for fqn in ["utils::a", "utils::b", "utils::c"] {
        assert!(!snapshot.contains(fqn));
        assert_eq!(snapshot.edges_referencing(fqn), 0);
    }
    assert_eq!(snapshot.edge_count(), 0);
}

#[tokio::test]
async fn scenario_e_second_concurrent_apply_conflicts() {
    struct SlowAnalyzer;

    #[async_trait::async_trait]
    impl trellis_sync::FileAnalyzer for SlowAnalyzer {
        async fn analyze(&self, path: &std::path::Path) -> trellis_core::Result<FileAnalysis> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(FileAnalysis {
                nodes: vec![node("slow::f", &path.display().to_string(), 5)],
                edges: Vec::new(),
            })
        }
    }

    let updater = Arc::new(GraphUpdater::new(
        Arc::new(SlowAnalyzer),
        Arc::new(InMemoryStorage::new()),
        Arc::new(NoopIndex),
    ));
    updater.register_repo("demo", GraphIndex::new());

    let background = Arc::clone(&updater);
    let first = tokio::spawn(async move {
        background
            .apply_changes(
                "demo",
                &[FileChange {
                    path: PathBuf::from("src/slow.py"),
                    change: ChangeKind::Added,
                    old_path: None,
                }],
                None,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = updater
        .apply_changes(
            "demo",
            &[FileChange {
                path: PathBuf::from("src/other.py"),
                change: ChangeKind::Added,
                old_path: None,
            }],
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn committed_sync_is_visible_to_the_next_assembly() {
    let mut analyses = HashMap::new();
    analyses.insert(
        PathBuf::from("src/extra.py"),
        FileAnalysis {
            nodes: vec![node("extra::helper", "src/extra.py", 40)],
            edges: vec![edge("extra::helper", "core::engine")],
        },
    );
    let updater = GraphUpdater::new(
        Arc::new(MapAnalyzer::new(analyses)),
        Arc::new(InMemoryStorage::new()),
        Arc::new(NoopIndex),
    );
    updater.register_repo("demo", demo_graph());

    // A snapshot taken before the sync keeps its version.
    let before = updater.snapshot("demo").await.unwrap();

    updater
        .apply_changes(
            "demo",
            &[FileChange {
                path: PathBuf::from("src/extra.py"),
                change: ChangeKind::Added,
                old_path: None,
            }],
            None,
        )
        .await
        .unwrap();

    let after = updater.snapshot("demo").await.unwrap();
    assert!(before.version() < after.version());
    assert!(!before.contains("extra::helper"));
    assert!(after.contains("extra::helper"));

    let engine = ContextEngine::new(Arc::new(trellis_context::NullScorer), AssemblyConfig::default()).unwrap();
    let request = ContextRequest {
        repo: "demo".to_string(),
        entry_points: vec!["extra::helper".to_string()],
        task: "explain the helper".to_string(),
        max_tokens: 1000,
        reserve: 0,
        depth: 2,
        direction: Direction::Outgoing,
        model: "gpt-4".to_string(),
        strategy: Strategy::Greedy,
    };
    let result = engine.assemble_context(&after, &request).await.unwrap();
    let fqns: Vec<&str> = result.nodes.iter().map(|n| n.fqn.as_str()).collect();
    assert!(fqns.contains(&"extra::helper"));
    assert!(fqns.contains(&"core::engine"));
}

// ── CLI smoke test ──────────────────────────────────────────────────────

#[test]
fn cli_help_mentions_the_commands() {
    let output = Command::new("cargo")
        .args(["run", "--quiet", "--", "--help"])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .expect("failed to execute trellis");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("assemble"));
    assert!(stdout.contains("apply"));
    assert!(stdout.contains("inspect"));
}

#[test]
fn cli_assemble_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let graph_path = dir.path().join("graph.json");
    let graph_json = serde_json::json!({
        "nodes": [
            node("api::serve", "src/api.py", 120),
            node("api::route", "src/api.py", 90),
            node("core::engine", "src/core.py", 200),
        ],
        "edges": [
            edge("api::serve", "api::route"),
            edge("api::route", "core::engine"),
        ],
    });
    std::fs::write(&graph_path, graph_json.to_string()).unwrap();

    let output = Command::new("cargo")
        .args([
            "run",
            "--quiet",
            "--",
            "assemble",
            "--graph",
            graph_path.to_str().unwrap(),
            "--task",
            "smoke test",
            "--entry",
            "api::serve",
            "--max-tokens",
            "500",
            "--format",
            "structured",
        ])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .expect("failed to execute trellis");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // Logs go to stderr; stdout is the structured result alone.
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["total_tokens"].as_u64().unwrap() <= 500);
    assert!(value["nodes_included"].as_u64().unwrap() >= 1);
}
