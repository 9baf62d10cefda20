//! CLI command implementations

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};

use trellis_context::{
    AssemblyConfig, ContextEngine, ContextRequest, NullScorer, OutputFormat, ProvidedScores,
    SemanticScorer, Strategy, render,
};
use trellis_core::{Direction, Edge, FileChange, GraphIndex, Node};
use trellis_sync::{FileAnalysis, GraphUpdater, InMemoryStorage, MapAnalyzer, NoopIndex};

/// Graph snapshot wire format: flat node and edge lists.
#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

fn load_graph(path: &Path) -> anyhow::Result<GraphIndex> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading graph snapshot {}", path.display()))?;
    let file: GraphFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing graph snapshot {}", path.display()))?;
    Ok(GraphIndex::from_parts(file.nodes, file.edges))
}

fn save_graph(path: &Path, index: &GraphIndex) -> anyhow::Result<()> {
    let file = GraphFile {
        nodes: index.all_nodes().cloned().collect(),
        edges: index.all_edges().cloned().collect(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("writing graph snapshot {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Args)]
pub struct AssembleArgs {
    /// Graph snapshot JSON file
    #[arg(long)]
    pub graph: PathBuf,

    /// Precomputed semantic scores JSON file (fqn -> score in [0, 1])
    #[arg(long)]
    pub scores: Option<PathBuf>,

    /// Natural-language task description
    #[arg(long)]
    pub task: String,

    /// Entry points: fqns or file paths (repeatable)
    #[arg(long = "entry", required = true)]
    pub entry_points: Vec<String>,

    /// Token budget
    #[arg(long, default_value = "8000")]
    pub max_tokens: u32,

    /// Tokens held back from the budget
    #[arg(long, default_value = "0")]
    pub reserve: u32,

    /// Traversal depth, within [1, 5]
    #[arg(long, default_value = "2")]
    pub depth: u32,

    /// Model identifier for token accounting
    #[arg(long, default_value = "gpt-4")]
    pub model: String,

    /// Allocation strategy: greedy, proportional, knapsack, adaptive
    #[arg(long, default_value = "adaptive")]
    pub strategy: String,

    /// Output format: plain, markdown, structured
    #[arg(long, default_value = "plain")]
    pub format: String,

    /// Optional TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub async fn assemble(args: AssembleArgs) -> anyhow::Result<()> {
    let snapshot = load_graph(&args.graph)?;
    tracing::info!(
        "loaded {} nodes, {} edges",
        snapshot.node_count(),
        snapshot.edge_count()
    );

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            AssemblyConfig::from_toml_str(&text)?
        }
        None => AssemblyConfig::default(),
    };

    // Semantic similarity is supplied externally; a scores file stands in
    // for the embedding service here.
    let scorer: Arc<dyn SemanticScorer> = match &args.scores {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading scores {}", path.display()))?;
            let scores: HashMap<String, f32> = serde_json::from_str(&text)
                .with_context(|| format!("parsing scores {}", path.display()))?;
            Arc::new(ProvidedScores::new(scores))
        }
        None => Arc::new(NullScorer),
    };

    let engine = ContextEngine::new(scorer, config)?;
    let request = ContextRequest {
        repo: "local".to_string(),
        entry_points: args.entry_points,
        task: args.task,
        max_tokens: args.max_tokens,
        reserve: args.reserve,
        depth: args.depth,
        direction: Direction::Outgoing,
        model: args.model,
        strategy: args.strategy.parse::<Strategy>()?,
    };

    let result = engine.assemble_context(&snapshot, &request).await?;
    let format = args.format.parse::<OutputFormat>()?;
    println!("{}", render(&result, format));
    Ok(())
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Graph snapshot JSON file
    #[arg(long)]
    pub graph: PathBuf,

    /// FileChange batch JSON file
    #[arg(long)]
    pub changes: PathBuf,

    /// Re-analysis results JSON file (path -> {nodes, edges})
    #[arg(long)]
    pub analysis: PathBuf,

    /// Repository identifier
    #[arg(long, default_value = "local")]
    pub repo: String,

    /// Where to write the updated snapshot (omit for a dry run)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Sync deadline in milliseconds
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}

pub async fn apply(args: ApplyArgs) -> anyhow::Result<()> {
    let initial = load_graph(&args.graph)?;

    let changes: Vec<FileChange> = serde_json::from_str(
        &std::fs::read_to_string(&args.changes)
            .with_context(|| format!("reading changes {}", args.changes.display()))?,
    )
    .with_context(|| format!("parsing changes {}", args.changes.display()))?;

    let analyses: HashMap<PathBuf, FileAnalysis> = serde_json::from_str(
        &std::fs::read_to_string(&args.analysis)
            .with_context(|| format!("reading analysis {}", args.analysis.display()))?,
    )
    .with_context(|| format!("parsing analysis {}", args.analysis.display()))?;

    let updater = GraphUpdater::new(
        Arc::new(MapAnalyzer::new(analyses)),
        Arc::new(InMemoryStorage::new()),
        Arc::new(NoopIndex),
    );
    updater.register_repo(&args.repo, initial);

    let deadline = args.deadline_ms.map(Duration::from_millis);
    let report = updater.apply_changes(&args.repo, &changes, deadline).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(out) = &args.out {
        let snapshot = updater.snapshot(&args.repo).await?;
        save_graph(out, &snapshot)?;
        tracing::info!("updated snapshot written to {}", out.display());
    }
    Ok(())
}

pub fn inspect(graph: PathBuf) -> anyhow::Result<()> {
    let index = load_graph(&graph)?;
    println!(
        "{} nodes, {} edges, {}",
        index.node_count(),
        index.edge_count(),
        index.version()
    );
    for path in index.files() {
        println!("  {} ({} nodes)", path.display(), index.nodes_in_file(path).len());
    }
    Ok(())
}
