//! Trellis Sync — keeps the dependency graph consistent under file churn
//! without full re-analysis

pub mod collab;
pub mod lock;
pub mod state;
pub mod store;
pub mod updater;

pub use collab::{
    FileAnalysis, FileAnalyzer, GraphStorage, InMemoryStorage, MapAnalyzer, NoopIndex,
    SemanticIndex, StorageTransaction,
};
pub use lock::{LockGuard, LockManager};
pub use state::{RepoSyncStatus, SyncRegistry, SyncState};
pub use store::SnapshotStore;
pub use updater::{ApplyReport, GraphUpdater};
