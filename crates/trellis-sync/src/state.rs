//! Per-repository sync state machine: IDLE -> SYNCING -> {IDLE, ERROR}

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
}

/// Current sync status of one repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoSyncStatus {
    pub state: SyncState,
    /// Consecutive failed syncs; reset by the next success.
    pub retries: u32,
    pub last_error: Option<String>,
}

impl Default for RepoSyncStatus {
    fn default() -> Self {
        RepoSyncStatus {
            state: SyncState::Idle,
            retries: 0,
            last_error: None,
        }
    }
}

/// Status registry for all known repositories.
pub struct SyncRegistry {
    inner: DashMap<String, RepoSyncStatus>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        SyncRegistry {
            inner: DashMap::new(),
        }
    }

    /// Status of a repository; unknown repositories read as idle.
    pub fn status(&self, repo: &str) -> RepoSyncStatus {
        self.inner
            .get(repo)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn begin(&self, repo: &str) {
        self.inner.entry(repo.to_string()).or_default().state = SyncState::Syncing;
    }

    pub fn succeed(&self, repo: &str) {
        self.inner.insert(repo.to_string(), RepoSyncStatus::default());
    }

    pub fn fail(&self, repo: &str, error: String) {
        let mut entry = self.inner.entry(repo.to_string()).or_default();
        entry.state = SyncState::Error;
        entry.retries += 1;
        entry.last_error = Some(error);
    }
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}
