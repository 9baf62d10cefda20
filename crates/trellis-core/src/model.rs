//! Core data structures for the dependency graph

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Discriminates what kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Class,
    Function,
}

/// A single entity in the dependency graph.
///
/// The `fqn` is unique within one graph snapshot. Nodes are produced by an
/// external analyzer, replaced wholesale when their file is re-analyzed, and
/// deleted when their file is removed or renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub fqn: String,
    pub kind: NodeKind,
    pub path: PathBuf,
    /// 1-based inclusive start/end lines, when known.
    pub line_range: Option<(u32, u32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// What kind of relationship an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Imports,
    Calls,
    Extends,
}

/// A directed edge between two nodes, keyed by fqn.
///
/// Edges are recomputed whenever either endpoint's owning file changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_fqn: String,
    pub target_fqn: String,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Traversal direction over dependency edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Monotonically increasing snapshot identifier.
///
/// Bumped only when a mutation commits; doubles as the cache-invalidation
/// and snapshot-isolation token.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GraphVersion(pub u64);

impl GraphVersion {
    pub fn next(self) -> Self {
        GraphVersion(self.0 + 1)
    }
}

impl std::fmt::Display for GraphVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A node paired with its per-request relevance scores. Ephemeral, produced
/// once per assembly request and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedNode {
    pub node: Node,
    /// Distance-based relevance in [0, 1].
    pub structural_score: f32,
    /// Externally supplied similarity in [0, 1].
    pub semantic_score: f32,
    /// Weighted fusion of the two, in [0, 1].
    pub combined_score: f32,
    pub token_count: u32,
}

/// How a file changed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// A single file-level change event feeding the incremental updater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: PathBuf,
    pub change: ChangeKind,
    /// Previous path for renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<PathBuf>,
}
