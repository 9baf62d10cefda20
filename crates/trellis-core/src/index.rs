//! In-memory graph index backed by petgraph::StableDiGraph
//!
//! Node/edge lookup is O(1) through fqn and file side maps; traversal is a
//! bounded multi-source BFS that tolerates cycles and reports each reachable
//! node with its shortest discovered distance.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use petgraph::Direction as PetDirection;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Direction, Edge, EdgeKind, GraphVersion, Node};

/// Smallest accepted traversal depth.
pub const MIN_DEPTH: u32 = 1;
/// Largest accepted traversal depth.
pub const MAX_DEPTH: u32 = 5;

/// Reject out-of-range traversal depths before any work happens.
pub fn validate_depth(depth: u32) -> Result<()> {
    if !(MIN_DEPTH..=MAX_DEPTH).contains(&depth) {
        return Err(Error::InvalidArgument(format!(
            "traversal depth must be within [{MIN_DEPTH}, {MAX_DEPTH}], got {depth}"
        )));
    }
    Ok(())
}

/// The dependency graph for one repository snapshot.
///
/// Cloning is the copy-on-write primitive: the updater stages its mutations
/// on a clone and publishes it only on commit, so a clone handed to a
/// request stays consistent for the request's whole lifetime.
#[derive(Clone)]
pub struct GraphIndex {
    inner: StableDiGraph<Node, Edge>,
    by_fqn: HashMap<String, NodeIndex>,
    by_file: HashMap<PathBuf, Vec<NodeIndex>>,
    version: GraphVersion,
}

impl std::fmt::Debug for GraphIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphIndex")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .field("version", &self.version)
            .finish()
    }
}

impl GraphIndex {
    pub fn new() -> Self {
        GraphIndex {
            inner: StableDiGraph::new(),
            by_fqn: HashMap::new(),
            by_file: HashMap::new(),
            version: GraphVersion::default(),
        }
    }

    /// Build an index from analyzer output. Edges with a missing endpoint
    /// are dropped, keeping the no-dangling-edge invariant from the start.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut index = GraphIndex::new();
        for node in nodes {
            index.upsert_node(node);
        }
        for edge in edges {
            index.insert_edge(edge);
        }
        index
    }

    /// Snapshot version this index represents.
    pub fn version(&self) -> GraphVersion {
        self.version
    }

    /// Stamp the version. Called by the updater when a staged copy commits.
    pub fn set_version(&mut self, version: GraphVersion) {
        self.version = version;
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Look up a node by fqn.
    pub fn get_node(&self, fqn: &str) -> Option<&Node> {
        self.by_fqn.get(fqn).and_then(|&idx| self.inner.node_weight(idx))
    }

    /// Whether a node with this fqn exists.
    pub fn contains(&self, fqn: &str) -> bool {
        self.by_fqn.contains_key(fqn)
    }

    /// All nodes owned by a file, ordered by fqn.
    pub fn nodes_in_file(&self, path: &Path) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self
            .by_file
            .get(path)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.inner.node_weight(idx))
                    .collect()
            })
            .unwrap_or_default();
        nodes.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        nodes
    }

    /// Iterate over all nodes.
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner
            .node_indices()
            .filter_map(|idx| self.inner.node_weight(idx))
    }

    /// Iterate over all edges.
    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.inner
            .edge_indices()
            .filter_map(|idx| self.inner.edge_weight(idx))
    }

    /// All file paths that own at least one node, sorted.
    pub fn files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = self
            .by_file
            .iter()
            .filter(|(_, indices)| !indices.is_empty())
            .map(|(path, _)| path.as_path())
            .collect();
        files.sort();
        files
    }

    /// Count edges that reference the node in either direction.
    pub fn edges_referencing(&self, fqn: &str) -> usize {
        let Some(&idx) = self.by_fqn.get(fqn) else {
            return 0;
        };
        self.inner.edges_directed(idx, PetDirection::Outgoing).count()
            + self.inner.edges_directed(idx, PetDirection::Incoming).count()
    }

    /// Adjacent nodes over the given edge kinds, ordered by fqn.
    /// An empty `kinds` slice means all kinds.
    pub fn neighbors(&self, fqn: &str, kinds: &[EdgeKind], direction: Direction) -> Vec<&Node> {
        let Some(&idx) = self.by_fqn.get(fqn) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for (pet_dir, enabled) in [
            (PetDirection::Outgoing, direction != Direction::Incoming),
            (PetDirection::Incoming, direction != Direction::Outgoing),
        ] {
            if !enabled {
                continue;
            }
            for edge_ref in self.inner.edges_directed(idx, pet_dir) {
                if !kinds.is_empty() && !kinds.contains(&edge_ref.weight().kind) {
                    continue;
                }
                let other = if pet_dir == PetDirection::Outgoing {
                    edge_ref.target()
                } else {
                    edge_ref.source()
                };
                if seen.insert(other) {
                    if let Some(node) = self.inner.node_weight(other) {
                        nodes.push(node);
                    }
                }
            }
        }
        nodes.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        nodes
    }

    /// Multi-source BFS from the entry fqns, bounded by `depth`.
    ///
    /// Returns each reachable node with its shortest discovered distance
    /// (entry points themselves at distance 0), ordered by ascending
    /// distance then ascending fqn. Entry fqns missing from the index are
    /// skipped; resolving names to nodes is the caller's concern. Cycles
    /// are tolerated through the visited set.
    pub fn traverse(
        &self,
        entry_points: &[String],
        depth: u32,
        direction: Direction,
    ) -> Result<Vec<(Node, u32)>> {
        validate_depth(depth)?;

        let mut visited: HashMap<NodeIndex, u32> = HashMap::new();
        let mut queue: VecDeque<(NodeIndex, u32)> = VecDeque::new();

        let mut seeds: Vec<&String> = entry_points.iter().collect();
        seeds.sort();
        seeds.dedup();
        for fqn in seeds {
            if let Some(&idx) = self.by_fqn.get(fqn.as_str()) {
                if !visited.contains_key(&idx) {
                    visited.insert(idx, 0);
                    queue.push_back((idx, 0));
                }
            }
        }

        while let Some((idx, dist)) = queue.pop_front() {
            if dist >= depth {
                continue;
            }
            for (pet_dir, enabled) in [
                (PetDirection::Outgoing, direction != Direction::Incoming),
                (PetDirection::Incoming, direction != Direction::Outgoing),
            ] {
                if !enabled {
                    continue;
                }
                for edge_ref in self.inner.edges_directed(idx, pet_dir) {
                    let other = if pet_dir == PetDirection::Outgoing {
                        edge_ref.target()
                    } else {
                        edge_ref.source()
                    };
                    if !visited.contains_key(&other) {
                        visited.insert(other, dist + 1);
                        queue.push_back((other, dist + 1));
                    }
                }
            }
        }

        let mut reached: Vec<(Node, u32)> = visited
            .into_iter()
            .filter_map(|(idx, dist)| self.inner.node_weight(idx).map(|n| (n.clone(), dist)))
            .collect();
        reached.sort_by(|(a, da), (b, db)| da.cmp(db).then_with(|| a.fqn.cmp(&b.fqn)));
        Ok(reached)
    }

    // ── Mutation primitives (driven by the incremental updater) ─────────

    /// Insert or replace a node, keyed by fqn. Returns true when the node
    /// is new. Replacement keeps existing edges; the updater recomputes
    /// outgoing edges for touched files afterwards.
    pub fn upsert_node(&mut self, node: Node) -> bool {
        if let Some(&idx) = self.by_fqn.get(&node.fqn) {
            let old_path = self.inner[idx].path.clone();
            if old_path != node.path {
                if let Some(indices) = self.by_file.get_mut(&old_path) {
                    indices.retain(|&i| i != idx);
                }
                self.by_file.entry(node.path.clone()).or_default().push(idx);
            }
            self.inner[idx] = node;
            false
        } else {
            let fqn = node.fqn.clone();
            let path = node.path.clone();
            let idx = self.inner.add_node(node);
            self.by_fqn.insert(fqn, idx);
            self.by_file.entry(path).or_default().push(idx);
            true
        }
    }

    /// Remove every node owned by a file, along with all edges touching
    /// them. Returns the removed fqns, sorted. Idempotent: a second call
    /// for the same file removes nothing.
    pub fn remove_nodes_in_file(&mut self, path: &Path) -> Vec<String> {
        let Some(indices) = self.by_file.remove(path) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for idx in indices {
            if let Some(node) = self.inner.remove_node(idx) {
                self.by_fqn.remove(&node.fqn);
                removed.push(node.fqn);
            }
        }
        removed.sort();
        removed
    }

    /// Remove a single node and every edge touching it. Returns true when
    /// the node existed. Idempotent.
    pub fn remove_node(&mut self, fqn: &str) -> bool {
        let Some(idx) = self.by_fqn.remove(fqn) else {
            return false;
        };
        match self.inner.remove_node(idx) {
            Some(node) => {
                if let Some(indices) = self.by_file.get_mut(&node.path) {
                    indices.retain(|&i| i != idx);
                }
                true
            }
            None => false,
        }
    }

    /// Drop all outgoing edges of a node. Returns how many were removed.
    pub fn drop_outgoing_edges(&mut self, fqn: &str) -> usize {
        let Some(&idx) = self.by_fqn.get(fqn) else {
            return 0;
        };
        let edge_ids: Vec<_> = self
            .inner
            .edges_directed(idx, PetDirection::Outgoing)
            .map(|edge_ref| edge_ref.id())
            .collect();
        let count = edge_ids.len();
        for id in edge_ids {
            self.inner.remove_edge(id);
        }
        count
    }

    /// Insert an edge if both endpoints exist and an identical edge is not
    /// already present. Returns true when the edge was added. Dropping
    /// dangling references here is what keeps the snapshot invariant local
    /// to this type.
    pub fn insert_edge(&mut self, edge: Edge) -> bool {
        let (Some(&source), Some(&target)) = (
            self.by_fqn.get(&edge.source_fqn),
            self.by_fqn.get(&edge.target_fqn),
        ) else {
            debug!(
                source = %edge.source_fqn,
                target = %edge.target_fqn,
                "dropping edge with missing endpoint"
            );
            return false;
        };
        let duplicate = self
            .inner
            .edges_directed(source, PetDirection::Outgoing)
            .any(|e| e.target() == target && *e.weight() == edge);
        if duplicate {
            return false;
        }
        self.inner.add_edge(source, target, edge);
        true
    }
}

impl Default for GraphIndex {
    fn default() -> Self {
        Self::new()
    }
}
