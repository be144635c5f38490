//! Thread-safe LRU cache over deserialized block values.
//!
//! `get` counts as a use: a key read just before an insert that overflows
//! capacity survives the eviction. Single-entry atomicity under concurrent
//! load — readers never observe torn values because every operation holds
//! the one lock.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Fixed-capacity LRU map.
pub struct LruMap<K: std::hash::Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: std::hash::Hash + Eq, V: Clone> LruMap<K, V> {
    /// Capacity is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("clamped to >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a key, refreshing its recency on hit.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    /// Insert or update a key, making it most-recently used. Evicts the
    /// least-recently-used entry when over capacity.
    pub fn put(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_eviction_is_least_recently_used() {
        let cache = LruMap::new(3);
        cache.put("k1", 1);
        cache.put("k2", 2);
        cache.put("k3", 3);
        // Touch k1 so k2 becomes the LRU entry.
        assert_eq!(cache.get(&"k1"), Some(1));
        cache.put("k4", 4);

        assert_eq!(cache.get(&"k2"), None);
        assert_eq!(cache.get(&"k1"), Some(1));
        assert_eq!(cache.get(&"k3"), Some(3));
        assert_eq!(cache.get(&"k4"), Some(4));
    }

    #[test]
    fn test_put_updates_existing_key() {
        let cache = LruMap::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10); // refresh + update
        cache.put("c", 3); // evicts b, not a

        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_clear() {
        let cache = LruMap::new(4);
        cache.put(1, "x");
        cache.put(2, "y");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;

        let cache = Arc::new(LruMap::new(64));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    cache.put((t, i), i);
                    let _ = cache.get(&(t, i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 64);
    }

    proptest! {
        /// After k+1 distinct inserts into a capacity-k cache, the first key
        /// is gone and the rest are present.
        #[test]
        fn prop_oldest_of_distinct_puts_is_evicted(k in 1usize..16) {
            let cache = LruMap::new(k);
            for i in 0..=k {
                cache.put(i, i * 10);
            }
            prop_assert_eq!(cache.get(&0), None);
            for i in 1..=k {
                prop_assert_eq!(cache.get(&i), Some(i * 10));
            }
        }
    }
}
