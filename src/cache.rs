//! Capacity-bounded LRU cache of computed thumbnail results.
//!
//! The cache is the one piece of state touched from both the worker thread
//! and arbitrary caller threads, so every operation is serialized behind a
//! single mutex and the whole API takes `&self`.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::thumbnail::{MediaKey, ThumbnailResult, THUMBNAIL_BYTES_PER_PIXEL};

/// Number of cache entries that fit a memory target at the given thumbnail
/// dimensions: `target_bytes / (width * height * 3)`, clamped to at least
/// one entry so pathological dimensions cannot produce an unusable cache.
pub fn capacity_for(target_bytes: usize, width: u32, height: u32) -> usize {
    let entry_bytes = width as usize * height as usize * THUMBNAIL_BYTES_PER_PIXEL;
    if entry_bytes == 0 {
        return 1;
    }
    (target_bytes / entry_bytes).max(1)
}

struct Inner {
    entries: LruCache<MediaKey, Option<Arc<ThumbnailResult>>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe LRU map from [`MediaKey`] to a computed result.
///
/// A `None` value is the *absent marker* written by [`remove`]: lookups
/// treat it as a miss, so the key is recomputed on its next request, while
/// the slot keeps occupying LRU capacity until evicted.
///
/// [`remove`]: ThumbnailCache::remove
pub struct ThumbnailCache {
    inner: Mutex<Inner>,
}

impl ThumbnailCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(non_zero(capacity)),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Looks up a result, promoting the entry in LRU order. No side effect
    /// beyond the bookkeeping; absent markers read as misses.
    pub fn get(&self, key: MediaKey) -> Option<Arc<ThumbnailResult>> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get(&key).and_then(Clone::clone);
        match &found {
            Some(_) => {
                inner.hits += 1;
                trace!(%key, "result cache hit");
            }
            None => {
                inner.misses += 1;
                trace!(%key, "result cache miss");
            }
        }
        found
    }

    /// Inserts or replaces the result for a key, evicting the least
    /// recently accessed entry when over capacity.
    pub fn put(&self, key: MediaKey, result: Arc<ThumbnailResult>) {
        let mut inner = self.inner.lock();
        trace!(%key, valid = result.is_valid(), "storing result");
        inner.entries.put(key, Some(result));
    }

    /// Invalidates a key by storing the absent marker in its slot.
    pub fn remove(&self, key: MediaKey) {
        let mut inner = self.inner.lock();
        debug!(%key, "invalidating cached result");
        inner.entries.put(key, None);
    }

    /// Drops every entry and rebuilds the cache at a new capacity. Used
    /// when the thumbnail dimensions change.
    pub fn reset(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        debug!(capacity, dropped = inner.entries.len(), "rebuilding result cache");
        inner.entries = LruCache::new(non_zero(capacity));
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Number of occupied slots, absent markers included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    /// Snapshot of hit/miss counters and occupancy.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cache: {}/{} entries, {} hits, {} misses",
            self.size, self.capacity, self.hits, self.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn result() -> Arc<ThumbnailResult> {
        Arc::new(ThumbnailResult::invalid())
    }

    #[test_case(5 * 1024 * 1024, 100, 100 => 174 ; "five mib at hundred square")]
    #[test_case(6 * 1024 * 1024, 100, 100 => 209 ; "six mib at hundred square")]
    #[test_case(5 * 1024 * 1024, 0, 100 => 1 ; "zero width clamps to one")]
    #[test_case(1, 1000, 1000 => 1 ; "tiny target clamps to one")]
    #[test_case(0, 100, 100 => 1 ; "zero target clamps to one")]
    fn capacity_for_cases(target_bytes: usize, width: u32, height: u32) -> usize {
        capacity_for(target_bytes, width, height)
    }

    #[test]
    fn eviction_is_least_recently_accessed() {
        let cache = ThumbnailCache::new(2);
        cache.put(MediaKey(1), result());
        cache.put(MediaKey(2), result());

        // Touch key 1 so key 2 becomes the eviction candidate.
        assert!(cache.get(MediaKey(1)).is_some());
        cache.put(MediaKey(3), result());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(MediaKey(1)).is_some());
        assert!(cache.get(MediaKey(2)).is_none());
        assert!(cache.get(MediaKey(3)).is_some());
    }

    #[test]
    fn overfilling_keeps_exactly_capacity_entries() {
        let cache = ThumbnailCache::new(4);
        for id in 0..10 {
            cache.put(MediaKey(id), result());
        }
        assert_eq!(cache.len(), 4);
        for id in 0..6 {
            assert!(cache.get(MediaKey(id)).is_none());
        }
        for id in 6..10 {
            assert!(cache.get(MediaKey(id)).is_some());
        }
    }

    #[test]
    fn removed_key_reads_as_miss_but_holds_a_slot() {
        let cache = ThumbnailCache::new(4);
        cache.put(MediaKey(1), result());
        cache.remove(MediaKey(1));

        assert!(cache.get(MediaKey(1)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reset_drops_everything_and_resizes() {
        let cache = ThumbnailCache::new(4);
        cache.put(MediaKey(1), result());
        cache.put(MediaKey(2), result());

        cache.reset(8);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 8);
        assert!(cache.get(MediaKey(1)).is_none());
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = ThumbnailCache::new(4);
        cache.put(MediaKey(1), result());

        assert!(cache.get(MediaKey(1)).is_some());
        assert!(cache.get(MediaKey(2)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
    }
}
