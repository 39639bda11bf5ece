//! In-memory cache for per-node outputs of a branch.
//!
//! Uses moka's concurrent cache implementation.

use moka::sync::Cache;

/// Thread-safe in-memory cache with configurable capacity.
///
/// Cloning a [`MemCache`] yields a handle onto the same entries; use
/// [`MemCache::snapshot`] to get an independent copy.
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
    capacity: usize,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
            capacity,
        }
    }

    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.entries.insert(key, value);
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key)
    }

    pub fn contains(
        &self,
        key: &K,
    ) -> bool {
        self.entries.contains_key(key)
    }

    /// Copies every entry into a new, unshared cache of the same capacity.
    pub fn snapshot(&self) -> Self {
        let copy = Self::new(self.capacity);
        for (k, v) in self.entries.iter() {
            copy.set((*k).clone(), v);
        }
        copy
    }
}
