//! Per-repository write locks with a time-to-live.
//!
//! One sync per repository at a time. The TTL exists so a crashed holder
//! cannot deadlock future syncs: an expired lock is taken over on the next
//! acquisition, which is safe because every sync mutation is an idempotent
//! upsert or delete, never a relative increment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;
use trellis_core::{Error, Result};

#[derive(Debug)]
struct LockEntry {
    holder: u64,
    acquired_at: Instant,
}

/// Lock table keyed by repository identifier.
pub struct LockManager {
    locks: DashMap<String, LockEntry>,
    ttl: Duration,
    next_holder: AtomicU64,
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        LockManager {
            locks: DashMap::new(),
            ttl,
            next_holder: AtomicU64::new(1),
        }
    }

    /// Take the lock or fail immediately with `Conflict`. Never blocks.
    pub fn try_acquire(&self, repo: &str) -> Result<LockGuard<'_>> {
        let holder = self.next_holder.fetch_add(1, Ordering::Relaxed);
        match self.locks.entry(repo.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    holder,
                    acquired_at: Instant::now(),
                });
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().acquired_at.elapsed() > self.ttl {
                    warn!(repo, "sync lock expired, presuming holder dead and taking over");
                    occupied.insert(LockEntry {
                        holder,
                        acquired_at: Instant::now(),
                    });
                } else {
                    return Err(Error::Conflict(format!(
                        "sync already in progress for repository '{repo}'"
                    )));
                }
            }
        }
        Ok(LockGuard {
            locks: &self.locks,
            repo: repo.to_string(),
            holder,
        })
    }
}

/// Releases the lock on drop, but only while this guard is still the
/// holder: a guard whose lock was taken over after TTL expiry must not
/// release the new holder's lock.
#[derive(Debug)]
pub struct LockGuard<'a> {
    locks: &'a DashMap<String, LockEntry>,
    repo: String,
    holder: u64,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(&self.repo, |_, entry| entry.holder == self.holder);
    }
}
