//! Collaborator seams: per-language analyzer, semantic index, and durable
//! storage. Implementations are injected into the updater at construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trellis_core::{Edge, Error, GraphIndex, Node, Result};

/// What the external analyzer produced for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub nodes: Vec<Node>,
    /// Outgoing edges derived from this file's content.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Per-language analysis, performed by an external collaborator.
#[async_trait]
pub trait FileAnalyzer: Send + Sync {
    /// Analyze one file into nodes and outgoing edges. `DecodeError` marks
    /// an unreadable or binary file; the updater recovers by skipping it.
    async fn analyze(&self, path: &Path) -> Result<FileAnalysis>;
}

/// Analyzer backed by a prepared map. CLI runs feed it from a JSON file;
/// tests build it inline. Paths it does not know are decode failures,
/// the same way a binary file would be.
pub struct MapAnalyzer {
    files: HashMap<PathBuf, FileAnalysis>,
}

impl MapAnalyzer {
    pub fn new(files: HashMap<PathBuf, FileAnalysis>) -> Self {
        MapAnalyzer { files }
    }
}

#[async_trait]
impl FileAnalyzer for MapAnalyzer {
    async fn analyze(&self, path: &Path) -> Result<FileAnalysis> {
        self.files.get(path).cloned().ok_or_else(|| {
            Error::DecodeError(format!("no analysis available for '{}'", path.display()))
        })
    }
}

/// External semantic index, told which nodes appeared and disappeared
/// after a commit. Best-effort: the updater logs failures and moves on.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn notify(&self, added: &[String], removed: &[String]) -> Result<()>;
}

/// Index that ignores notifications.
pub struct NoopIndex;

#[async_trait]
impl SemanticIndex for NoopIndex {
    async fn notify(&self, _added: &[String], _removed: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Durable node/edge storage driven through explicit transactions.
///
/// Contract: `delete_nodes_in_file` also deletes every edge touching the
/// deleted nodes. That is what keeps committed state free of dangling
/// references. All operations are idempotent upserts/deletes so a retry
/// after a TTL takeover is safe.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>>;
}

/// One open transaction. Either `commit` or `rollback` consumes it; work
/// left uncommitted when it drops must not become visible.
#[async_trait]
pub trait StorageTransaction: Send {
    async fn upsert_node(&mut self, node: &Node) -> Result<()>;
    async fn delete_node(&mut self, fqn: &str) -> Result<()>;
    async fn delete_nodes_in_file(&mut self, path: &Path) -> Result<()>;
    async fn drop_outgoing_edges(&mut self, fqn: &str) -> Result<()>;
    async fn insert_edge(&mut self, edge: &Edge) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// In-memory storage for tests and offline CLI runs. The transaction works
/// on a private clone and publishes it atomically at commit.
pub struct InMemoryStorage {
    committed: Arc<Mutex<GraphIndex>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage {
            committed: Arc::new(Mutex::new(GraphIndex::new())),
        }
    }

    pub fn node_count(&self) -> usize {
        self.committed.lock().map(|index| index.node_count()).unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.committed.lock().map(|index| index.edge_count()).unwrap_or(0)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStorage for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>> {
        let staged = self
            .committed
            .lock()
            .map_err(|_| Error::TransactionFailure("storage mutex poisoned".to_string()))?
            .clone();
        Ok(Box::new(InMemoryTransaction {
            staged,
            committed: Arc::clone(&self.committed),
        }))
    }
}

struct InMemoryTransaction {
    staged: GraphIndex,
    committed: Arc<Mutex<GraphIndex>>,
}

#[async_trait]
impl StorageTransaction for InMemoryTransaction {
    async fn upsert_node(&mut self, node: &Node) -> Result<()> {
        self.staged.upsert_node(node.clone());
        Ok(())
    }

    async fn delete_node(&mut self, fqn: &str) -> Result<()> {
        self.staged.remove_node(fqn);
        Ok(())
    }

    async fn delete_nodes_in_file(&mut self, path: &Path) -> Result<()> {
        self.staged.remove_nodes_in_file(path);
        Ok(())
    }

    async fn drop_outgoing_edges(&mut self, fqn: &str) -> Result<()> {
        self.staged.drop_outgoing_edges(fqn);
        Ok(())
    }

    async fn insert_edge(&mut self, edge: &Edge) -> Result<()> {
        self.staged.insert_edge(edge.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut committed = self
            .committed
            .lock()
            .map_err(|_| Error::TransactionFailure("storage mutex poisoned".to_string()))?;
        *committed = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
