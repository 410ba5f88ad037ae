//! Render result memoization.
//!
//! During streaming the same content prefix is frequently re-rendered:
//! flushes snapshot the whole row, so an unchanged row re-renders its
//! earlier content byte for byte. Results are memoized by
//! `(content fingerprint, constraint width)`; differing widths are
//! independent entries, never merged. The cache is bounded with
//! least-recently-used eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::unit::RenderResult;

/// Cache key: content fingerprint plus constraint width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Fingerprint of `(content class, content)`.
    pub fingerprint: u64,
    /// Constraint width of the render.
    pub width: u16,
}

/// Bounded LRU memo of render results.
///
/// Shared across sessions behind a plain mutex; every operation is pure
/// in-memory bookkeeping so the lock is never held across I/O or a render.
#[derive(Debug)]
pub struct RenderCache {
    entries: HashMap<CacheKey, Arc<RenderResult>>,
    /// Recency order, oldest first.
    order: VecDeque<CacheKey>,
    capacity: usize,
}

impl RenderCache {
    /// Create a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Look up a result, refreshing its recency on a hit.
    pub fn get(&mut self, key: CacheKey) -> Option<Arc<RenderResult>> {
        let result = self.entries.get(&key).cloned()?;
        self.touch(key);
        Some(result)
    }

    /// Insert a result, evicting the least recently used beyond capacity.
    pub fn insert(&mut self, key: CacheKey, result: Arc<RenderResult>) {
        if self.entries.insert(key, result).is_none() {
            self.order.push_back(key);
        } else {
            self.touch(key);
        }
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn touch(&mut self, key: CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
            self.order.push_back(key);
        }
    }

    /// Number of memoized results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::unit::MeasuredSize;
    use std::time::Duration;

    fn result(height: u32) -> Arc<RenderResult> {
        Arc::new(RenderResult {
            lines: Vec::new(),
            size: MeasuredSize { width: 10, height },
            duration: Duration::ZERO,
            source_len: 0,
            source_chars: 0,
            is_complete: false,
            fallback: false,
        })
    }

    fn key(fingerprint: u64, width: u16) -> CacheKey {
        CacheKey { fingerprint, width }
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = RenderCache::new(8);
        cache.insert(key(1, 80), result(2));
        assert!(cache.get(key(1, 80)).is_some());
        assert!(cache.get(key(1, 40)).is_none());
        assert!(cache.get(key(2, 80)).is_none());
    }

    #[test]
    fn test_widths_are_independent_entries() {
        let mut cache = RenderCache::new(8);
        cache.insert(key(1, 80), result(2));
        cache.insert(key(1, 40), result(4));
        assert_eq!(cache.get(key(1, 80)).unwrap().size.height, 2);
        assert_eq!(cache.get(key(1, 40)).unwrap().size.height, 4);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = RenderCache::new(2);
        cache.insert(key(1, 80), result(1));
        cache.insert(key(2, 80), result(2));
        // Touch 1 so 2 becomes the eviction candidate.
        cache.get(key(1, 80));
        cache.insert(key(3, 80), result(3));
        assert!(cache.get(key(1, 80)).is_some());
        assert!(cache.get(key(2, 80)).is_none());
        assert!(cache.get(key(3, 80)).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_updates_value() {
        let mut cache = RenderCache::new(2);
        cache.insert(key(1, 80), result(1));
        cache.insert(key(1, 80), result(9));
        assert_eq!(cache.get(key(1, 80)).unwrap().size.height, 9);
        assert_eq!(cache.len(), 1);
    }
}
