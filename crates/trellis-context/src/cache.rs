//! Request-level result cache.
//!
//! Keys include the graph version, so any committed mutation implicitly
//! invalidates every entry computed against the old snapshot; the TTL just
//! bounds memory for abandoned versions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use trellis_core::{Direction, GraphVersion};

use crate::budget::Strategy;
use crate::engine::ContextResult;

/// Every request dimension that affects the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub repo: String,
    pub task: String,
    pub entry_points: Vec<String>,
    pub depth: u32,
    pub direction: Direction,
    pub max_tokens: u32,
    pub reserve: u32,
    pub model: String,
    pub strategy: Strategy,
    pub version: GraphVersion,
}

struct CacheEntry {
    result: ContextResult,
    timestamp: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.timestamp.elapsed() > self.ttl
    }
}

/// TTL'd cache of assembled results.
pub struct ResultCache {
    entries: DashMap<RequestKey, CacheEntry>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        ResultCache {
            entries: DashMap::new(),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached result for the key, if present and fresh.
    pub fn get(&self, key: &RequestKey) -> Option<ContextResult> {
        let hit = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.result.clone());
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Store a freshly assembled result.
    pub fn insert(&self, key: RequestKey, result: ContextResult) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                timestamp: Instant::now(),
                ttl: self.default_ttl,
            },
        );
    }

    /// Drop expired entries.
    pub fn cleanup_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
