//! Recent-source suppression
//!
//! Remembers when each key was last emitted. Capacity is bounded; the
//! oldest entries are evicted first.

use std::collections::{HashMap, VecDeque};

pub struct DedupCache {
    window_secs: i64,
    capacity: usize,
    seen: HashMap<String, i64>,
    order: VecDeque<(String, i64)>,
}

impl DedupCache {
    pub fn new(window_secs: i64, capacity: usize) -> Self {
        Self {
            window_secs,
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// True when `key` was not emitted within the window; records the emission
    pub fn should_emit(&mut self, key: &str, now: i64) -> bool {
        if let Some(&last) = self.seen.get(key) {
            if now - last < self.window_secs {
                return false;
            }
        }

        self.seen.insert(key.to_string(), now);
        self.order.push_back((key.to_string(), now));
        self.evict();
        true
    }

    fn evict(&mut self) {
        // `order` may hold superseded timestamps for re-emitted keys
        while self.seen.len() > self.capacity || self.order.len() > self.capacity * 2 {
            let Some((key, ts)) = self.order.pop_front() else {
                break;
            };
            if self.seen.get(&key) == Some(&ts) {
                self.seen.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_suppression() {
        let mut cache = DedupCache::new(10, 1000);
        assert!(cache.should_emit("203.0.113.1", 100));
        assert!(!cache.should_emit("203.0.113.1", 109));
        assert!(cache.should_emit("203.0.113.2", 109));
        assert!(cache.should_emit("203.0.113.1", 110));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = DedupCache::new(10, 3);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            assert!(cache.should_emit(key, i as i64));
        }
        assert_eq!(cache.seen.len(), 3);
        // "a" was evicted, so it is emitted again inside the window
        assert!(cache.should_emit("a", 5));
        assert!(!cache.should_emit("d", 5));
    }

    #[test]
    fn test_reemission_does_not_grow_unbounded() {
        let mut cache = DedupCache::new(1, 2);
        for t in 0..100 {
            cache.should_emit("x", t * 2);
        }
        assert_eq!(cache.seen.len(), 1);
        assert!(cache.order.len() <= 4);
    }
}
