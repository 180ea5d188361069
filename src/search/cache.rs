//! Bounded cache of in-flight and recently-settled search response slots.
//!
//! Keyed by request fingerprint. Two bounds are enforced after every
//! mutation: a maximum entry count and a maximum aggregate byte size
//! (estimated from each entry's serialized latest response). Eviction always
//! removes the least-recently-touched entry first, repeating until both
//! bounds hold. A single response bigger than the whole byte budget is not
//! worth keeping at all: its entry is dropped the moment it is measured.

use crate::search::stream::SearchSlot;
use lru::LruCache;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

struct CacheEntry {
    rx: watch::Receiver<SearchSlot>,
    size: usize,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    total_bytes: usize,
}

/// LRU + size-bounded map from request fingerprint to a shared response slot.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    max_items: usize,
    max_bytes: usize,
}

impl ResponseCache {
    pub fn new(max_items: usize, max_size_mb: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            max_items,
            max_bytes: max_size_mb * 1024 * 1024,
        }
    }

    /// Look up a shared slot, refreshing its recency.
    pub(crate) fn get(&self, key: &str) -> Option<watch::Receiver<SearchSlot>> {
        let mut guard = self.inner.lock().unwrap();
        guard.entries.get(key).map(|entry| entry.rx.clone())
    }

    /// Register a fresh slot under `key` at the most-recently-used end.
    pub(crate) fn set(&self, key: String, rx: watch::Receiver<SearchSlot>) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Some(old) = inner.entries.put(key, CacheEntry { rx, size: 0 }) {
            inner.total_bytes -= old.size;
        }
        Self::shrink(inner, self.max_items, self.max_bytes);
    }

    /// Record the byte size of the latest response published under `key`.
    ///
    /// Called by the driving task on every emission. Refreshes recency; an
    /// emission alone exceeding the byte budget evicts the entry outright.
    pub(crate) fn on_response(&self, key: &str, size: usize) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if size > self.max_bytes {
            if let Some(entry) = inner.entries.pop(key) {
                inner.total_bytes -= entry.size;
                debug!(key, size, "response exceeds cache budget, evicting");
            }
            return;
        }
        if let Some(entry) = inner.entries.get_mut(key) {
            let previous = entry.size;
            entry.size = size;
            inner.total_bytes = inner.total_bytes - previous + size;
        }
        Self::shrink(inner, self.max_items, self.max_bytes);
    }

    /// Drop everything; called on interceptor teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }

    fn shrink(inner: &mut CacheInner, max_items: usize, max_bytes: usize) {
        while inner.entries.len() > max_items || inner.total_bytes > max_bytes {
            match inner.entries.pop_lru() {
                Some((key, entry)) => {
                    inner.total_bytes -= entry.size;
                    debug!(key = %key, "evicted least-recently-used cache entry");
                }
                None => break,
            }
        }
    }
}
