//! Published snapshot store with copy-on-write installs

use std::sync::Arc;

use tokio::sync::RwLock;
use trellis_core::{GraphIndex, GraphVersion};

/// Holds the currently published snapshot for one repository.
///
/// Readers clone the `Arc` and keep one consistent version for as long as
/// they need it; a concurrent commit publishes a new snapshot without
/// touching theirs. The updater stages mutations on a clone and installs
/// it with a bumped version only when its transaction commits.
pub struct SnapshotStore {
    current: RwLock<Arc<GraphIndex>>,
}

impl SnapshotStore {
    pub fn new(initial: GraphIndex) -> Self {
        SnapshotStore {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The currently published snapshot.
    pub async fn current(&self) -> Arc<GraphIndex> {
        Arc::clone(&*self.current.read().await)
    }

    /// A private mutable copy of the current snapshot for staging.
    pub async fn begin_staged(&self) -> GraphIndex {
        (**self.current.read().await).clone()
    }

    /// Publish a staged snapshot under the next version.
    pub async fn install(&self, mut staged: GraphIndex) -> GraphVersion {
        let mut current = self.current.write().await;
        let version = current.version().next();
        staged.set_version(version);
        *current = Arc::new(staged);
        version
    }
}
