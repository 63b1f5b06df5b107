//! Bounded least-recently-used set of reported URLs.

use lru::LruCache;
use std::num::NonZeroUsize;

/// Capacity-bounded LRU set of normalized URLs.
///
/// A zero capacity stores nothing, so every URL looks new.
#[derive(Debug)]
pub struct SeenSet {
    entries: Option<LruCache<String, ()>>,
}

impl SeenSet {
    /// Create a new set holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    /// Whether `key` is present. Promotes it to most-recently-used if so.
    pub fn has(&mut self, key: &str) -> bool {
        self.entries
            .as_mut()
            .is_some_and(|entries| entries.get(key).is_some())
    }

    /// Insert `key`, evicting the least-recently-used entry when full.
    pub fn add(&mut self, key: &str) {
        if let Some(entries) = self.entries.as_mut() {
            entries.put(key.to_string(), ());
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_has() {
        let mut seen = SeenSet::new(4);
        seen.add("https://a/x.m3u8");
        assert!(seen.has("https://a/x.m3u8"));
        assert!(!seen.has("https://a/y.m3u8"));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut seen = SeenSet::new(3);
        seen.add("a");
        seen.add("b");
        seen.add("c");
        seen.add("d");

        assert!(!seen.has("a"));
        assert!(seen.has("b"));
        assert!(seen.has("c"));
        assert!(seen.has("d"));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_has_protects_from_eviction() {
        let mut seen = SeenSet::new(3);
        seen.add("a");
        seen.add("b");
        seen.add("c");

        // Touching "a" makes "b" the oldest entry.
        assert!(seen.has("a"));
        seen.add("d");

        assert!(seen.has("a"));
        assert!(!seen.has("b"));
        assert!(seen.has("c"));
        assert!(seen.has("d"));
    }

    #[test]
    fn test_re_adding_promotes() {
        let mut seen = SeenSet::new(2);
        seen.add("a");
        seen.add("b");
        seen.add("a");
        seen.add("c");

        assert!(seen.has("a"));
        assert!(!seen.has("b"));
    }

    #[test]
    fn test_size_never_exceeds_capacity_under_churn() {
        let mut seen = SeenSet::new(10);
        for i in 0..500 {
            let key = format!("https://cdn/{}.m3u8", i % 37);
            seen.add(&key);
            seen.has("https://cdn/0.m3u8");
            assert!(seen.len() <= 10);
        }
        assert!(seen.has("https://cdn/0.m3u8"));
    }

    #[test]
    fn test_clear() {
        let mut seen = SeenSet::new(4);
        seen.add("a");
        seen.clear();
        assert!(seen.is_empty());
        assert!(!seen.has("a"));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut seen = SeenSet::new(0);
        seen.add("a");
        assert!(!seen.has("a"));
        assert!(seen.is_empty());
    }
}
