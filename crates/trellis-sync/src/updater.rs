//! Incremental graph updater.
//!
//! Applies a batch of file changes in a fixed order (deletions, renames,
//! modifications, re-analysis, edge recomputation), staged on a private
//! copy of the snapshot and written through one storage transaction. The
//! staged copy is published (and the graph version bumped) only when the
//! transaction commits; any failure rolls the whole batch back and leaves
//! the published snapshot untouched.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use trellis_core::{ChangeKind, Edge, Error, FileChange, GraphIndex, Result};

use crate::collab::{FileAnalyzer, GraphStorage, SemanticIndex, StorageTransaction};
use crate::lock::LockManager;
use crate::state::{RepoSyncStatus, SyncRegistry};
use crate::store::SnapshotStore;

/// How long a sync may hold the repository lock before it is presumed dead.
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Outcome of one applied batch.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub nodes_added: usize,
    pub nodes_updated: usize,
    pub nodes_deleted: usize,
    pub edges_recalculated: usize,
    pub duration_ms: u64,
    /// Per-file recoverable failures (skipped files). Batch-level failures
    /// are errors, not report entries.
    pub errors: Vec<String>,
    pub finished_at: String,
}

struct StepOutcome {
    report: ApplyReport,
    added_fqns: Vec<String>,
    removed_fqns: Vec<String>,
}

/// Applies file-change batches to repository snapshots.
pub struct GraphUpdater {
    repos: DashMap<String, Arc<SnapshotStore>>,
    locks: LockManager,
    registry: SyncRegistry,
    analyzer: Arc<dyn FileAnalyzer>,
    storage: Arc<dyn GraphStorage>,
    semantic_index: Arc<dyn SemanticIndex>,
}

impl GraphUpdater {
    pub fn new(
        analyzer: Arc<dyn FileAnalyzer>,
        storage: Arc<dyn GraphStorage>,
        semantic_index: Arc<dyn SemanticIndex>,
    ) -> Self {
        GraphUpdater {
            repos: DashMap::new(),
            locks: LockManager::new(DEFAULT_LOCK_TTL),
            registry: SyncRegistry::new(),
            analyzer,
            storage,
            semantic_index,
        }
    }

    /// Override the lock TTL (e.g. for short-deadline deployments).
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.locks = LockManager::new(ttl);
        self
    }

    /// Register a repository with its initial snapshot.
    pub fn register_repo(&self, repo: &str, initial: GraphIndex) -> Arc<SnapshotStore> {
        let store = Arc::new(SnapshotStore::new(initial));
        self.repos.insert(repo.to_string(), Arc::clone(&store));
        store
    }

    /// The repository's currently published snapshot.
    pub async fn snapshot(&self, repo: &str) -> Result<Arc<GraphIndex>> {
        let store = self.store(repo)?;
        Ok(store.current().await)
    }

    pub fn status(&self, repo: &str) -> RepoSyncStatus {
        self.registry.status(repo)
    }

    fn store(&self, repo: &str) -> Result<Arc<SnapshotStore>> {
        self.repos
            .get(repo)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(format!("unknown repository '{repo}'")))
    }

    /// Apply a batch of changes under the repository's write lock.
    ///
    /// A second in-flight apply for the same repository fails immediately
    /// with `Conflict`. A deadline, when given, bounds the whole batch;
    /// expiry reports `Timeout` and rolls back like any other failure.
    pub async fn apply_changes(
        &self,
        repo: &str,
        changes: &[FileChange],
        deadline: Option<Duration>,
    ) -> Result<ApplyReport> {
        let store = self.store(repo)?;
        let _guard = self.locks.try_acquire(repo)?;
        self.registry.begin(repo);
        let started = Instant::now();

        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, self.run_batch(&store, changes)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "sync for '{repo}' exceeded its {}ms deadline",
                    limit.as_millis()
                ))),
            },
            None => self.run_batch(&store, changes).await,
        };

        match outcome {
            Ok(mut report) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                self.registry.succeed(repo);
                info!(
                    repo,
                    added = report.nodes_added,
                    updated = report.nodes_updated,
                    deleted = report.nodes_deleted,
                    edges = report.edges_recalculated,
                    "sync committed"
                );
                Ok(report)
            }
            Err(error) => {
                warn!(repo, %error, "sync failed, batch rolled back");
                self.registry.fail(repo, error.to_string());
                Err(error)
            }
        }
    }

    async fn run_batch(&self, store: &SnapshotStore, changes: &[FileChange]) -> Result<ApplyReport> {
        let mut staged = store.begin_staged().await;
        let mut tx = self.storage.begin().await?;

        match self.run_steps(&mut staged, tx.as_mut(), changes).await {
            Ok(outcome) => {
                tx.commit().await?;
                let version = store.install(staged).await;
                debug!(%version, "snapshot installed");

                // Best-effort, deliberately outside the transaction.
                if let Err(error) = self
                    .semantic_index
                    .notify(&outcome.added_fqns, &outcome.removed_fqns)
                    .await
                {
                    warn!(%error, "semantic index notification failed");
                }
                Ok(outcome.report)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(%rollback_error, "rollback reported an error");
                }
                Err(error)
            }
        }
    }

    async fn run_steps(
        &self,
        staged: &mut GraphIndex,
        tx: &mut dyn StorageTransaction,
        changes: &[FileChange],
    ) -> Result<StepOutcome> {
        let mut to_analyze: BTreeSet<PathBuf> = BTreeSet::new();
        let mut touched: BTreeSet<PathBuf> = BTreeSet::new();
        let mut errors: Vec<String> = Vec::new();
        let mut removed_fqns: Vec<String> = Vec::new();
        // Fqns deleted by a modification; those that reappear count as
        // updates, the rest as deletions.
        let mut prior_fqns: HashSet<String> = HashSet::new();
        let mut nodes_deleted = 0usize;

        // 1. Deletions.
        for change in changes.iter().filter(|c| c.change == ChangeKind::Deleted) {
            let removed = staged.remove_nodes_in_file(&change.path);
            tx.delete_nodes_in_file(&change.path).await?;
            nodes_deleted += removed.len();
            removed_fqns.extend(removed);
            touched.insert(change.path.clone());
        }

        // 2. Renames: delete the old side, analyze the new.
        for change in changes.iter().filter(|c| c.change == ChangeKind::Renamed) {
            if let Some(old_path) = &change.old_path {
                let removed = staged.remove_nodes_in_file(old_path);
                tx.delete_nodes_in_file(old_path).await?;
                nodes_deleted += removed.len();
                removed_fqns.extend(removed);
                touched.insert(old_path.clone());
            }
            to_analyze.insert(change.path.clone());
            touched.insert(change.path.clone());
        }

        // 3. Additions and modifications. A modified file's nodes are
        //    replaced in place at step 4; physical removal here would also
        //    destroy incoming edges from untouched files, which stay valid.
        for change in changes
            .iter()
            .filter(|c| matches!(c.change, ChangeKind::Added | ChangeKind::Modified))
        {
            if change.change == ChangeKind::Modified {
                prior_fqns.extend(
                    staged
                        .nodes_in_file(&change.path)
                        .iter()
                        .map(|node| node.fqn.clone()),
                );
            }
            to_analyze.insert(change.path.clone());
            touched.insert(change.path.clone());
        }

        // 4. Re-analyze and upsert. One unreadable file is skipped and
        //    reported, not fatal to the batch.
        let mut nodes_added = 0usize;
        let mut nodes_updated = 0usize;
        let mut added_fqns: Vec<String> = Vec::new();
        let mut pending_edges: Vec<Edge> = Vec::new();
        for path in &to_analyze {
            let analysis = match self.analyzer.analyze(path).await {
                Ok(analysis) => analysis,
                Err(Error::DecodeError(message)) => {
                    warn!(path = %path.display(), "skipping unreadable file");
                    errors.push(message);
                    // Leave the file's prior nodes alone; a bad read must
                    // not delete knowledge we already have.
                    prior_fqns.retain(|fqn| {
                        staged.get_node(fqn).map(|n| n.path != *path).unwrap_or(true)
                    });
                    continue;
                }
                Err(error) => return Err(error),
            };
            for node in analysis.nodes {
                if prior_fqns.remove(&node.fqn) {
                    nodes_updated += 1;
                } else {
                    nodes_added += 1;
                }
                added_fqns.push(node.fqn.clone());
                tx.upsert_node(&node).await?;
                staged.upsert_node(node);
            }
            pending_edges.extend(analysis.edges);
        }

        // Modified-file nodes that did not come back are deletions.
        let mut vanished: Vec<String> = prior_fqns.into_iter().collect();
        vanished.sort();
        for fqn in &vanished {
            staged.remove_node(fqn);
            tx.delete_node(fqn).await?;
        }
        nodes_deleted += vanished.len();
        removed_fqns.extend(vanished);

        // 5. Edge recomputation over the union of touched files: outgoing
        //    edges drop and re-derive from the fresh analysis; incoming
        //    edges from untouched files remain valid.
        let mut edges_recalculated = 0usize;
        for path in &touched {
            let fqns: Vec<String> = staged
                .nodes_in_file(path)
                .iter()
                .map(|node| node.fqn.clone())
                .collect();
            for fqn in fqns {
                staged.drop_outgoing_edges(&fqn);
                tx.drop_outgoing_edges(&fqn).await?;
            }
        }
        for edge in pending_edges {
            if staged.insert_edge(edge.clone()) {
                tx.insert_edge(&edge).await?;
                edges_recalculated += 1;
            }
        }

        Ok(StepOutcome {
            report: ApplyReport {
                nodes_added,
                nodes_updated,
                nodes_deleted,
                edges_recalculated,
                duration_ms: 0, // stamped by the caller once the lock work is done
                errors,
                finished_at: chrono::Utc::now().to_rfc3339(),
            },
            added_fqns,
            removed_fqns,
        })
    }
}
