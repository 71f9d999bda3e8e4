//! Bounded collection cache and unbounded cluster cache (spec.md §4.3).
//!
//! Both caches are read by many concurrent request tasks. Mutation happens
//! only from within the memoizer's critical section (see `memoizer.rs` and
//! `directory.rs`), so a handler that finds an entry present can read it
//! without any additional locking beyond what the cache's own container
//! requires for thread-safety.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;

use crate::directory::NodeRow;

/// Default capacity of the collection cache (spec.md §3).
pub const DEFAULT_COLLECTION_CACHE_CAPACITY: usize = 500_000;

/// Bounded LRU mapping collection name → cluster id, or `None` for a known
/// "no such collection" tombstone. A key's outright absence from the cache
/// (as opposed to a stored `None`) means "not yet asked" — the memoizer's
/// cache-check closure distinguishes the two by using `LruCache::get`,
/// which itself already returns `Option<&Option<i64>>`.
pub struct CollectionCache {
    inner: Mutex<LruCache<String, Option<i64>>>,
}

impl CollectionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a collection, refreshing its recency if present.
    pub fn get(&self, name: &str) -> Option<Option<i64>> {
        self.inner.lock().get(name).copied()
    }

    /// Insert or overwrite an entry, refreshing recency and evicting the
    /// least-recently-used entry if the cache is at capacity.
    pub fn put(&self, name: String, cluster_id: Option<i64>) {
        self.inner.lock().put(name, cluster_id);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// A cluster's declared host order plus a rotation cursor. Order is by
/// `node_number_in_cluster` ascending; rotation never adds, drops, or
/// reorders beyond cyclic shift — it only changes which element is "head".
pub struct ClusterRecord {
    pub rows: Vec<NodeRow>,
    hosts: Mutex<VecDeque<String>>,
}

impl ClusterRecord {
    pub fn new(rows: Vec<NodeRow>) -> Self {
        let hosts = rows.iter().map(|r| r.hostname.clone()).collect();
        Self {
            rows,
            hosts: Mutex::new(hosts),
        }
    }

    pub fn host_count(&self) -> usize {
        self.hosts.lock().len()
    }

    /// Rotate the queue by one and return the new head, without inspecting
    /// availability. Used by the selector's per-call "advance exactly once"
    /// fairness guarantee (spec.md §5).
    pub fn rotate_once(&self) -> Option<String> {
        let mut hosts = self.hosts.lock();
        hosts.rotate_left(1);
        hosts.front().cloned()
    }

    /// Snapshot the current order without mutating it (used for the
    /// liveness check, which must run against the list before any rotation
    /// performed during selection).
    pub fn snapshot(&self) -> Vec<String> {
        self.hosts.lock().iter().cloned().collect()
    }
}

/// Unbounded mapping from cluster id to cluster record. The number of
/// clusters is small and operator-bounded, so no eviction policy is needed.
pub struct ClusterCache {
    inner: DashMap<i64, Arc<ClusterRecord>>,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn get(&self, cluster_id: i64) -> Option<Arc<ClusterRecord>> {
        self.inner.get(&cluster_id).map(|r| r.clone())
    }

    pub fn put(&self, cluster_id: i64, record: Arc<ClusterRecord>) {
        self.inner.insert(cluster_id, record);
    }
}

impl Default for ClusterCache {
    fn default() -> Self {
        Self::new()
    }
}
