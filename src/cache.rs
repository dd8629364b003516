//! Plaintext response cache.
//!
//! Entries never expire and there is no eviction; the store only shrinks
//! on an explicit [`CacheStore::clear`]. Body and fetch duration live in
//! the same entry behind one lock, so a concurrent hit sees either the
//! whole entry or nothing.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::stats::ProxyStats;

#[derive(Debug, Clone)]
struct CacheEntry {
    body: Bytes,
    fetch_duration_ms: u64,
}

pub struct CacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    stats: Arc<ProxyStats>,
    reset_stats_on_clear: bool,
}

impl CacheStore {
    pub fn new(stats: Arc<ProxyStats>, reset_stats_on_clear: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats,
            reset_stats_on_clear,
        }
    }

    /// Store `body` for `url`, replacing any previous entry.
    pub fn put(&self, url: &str, body: Bytes, fetch_duration_ms: u64) {
        self.entries.lock().insert(
            url.to_string(),
            CacheEntry {
                body,
                fetch_duration_ms,
            },
        );
    }

    /// Serve a hit. Each hit credits the savings counters with twice the
    /// body length and the original fetch duration.
    pub fn get(&self, url: &str) -> Option<Bytes> {
        let entry = self.entries.lock().get(url).cloned()?;
        self.stats
            .record_hit(entry.body.len(), entry.fetch_duration_ms);
        Some(entry.body)
    }

    pub fn has(&self, url: &str) -> bool {
        self.entries.lock().contains_key(url)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        if self.reset_stats_on_clear {
            self.stats.reset_savings();
        }
    }

    /// Cached URLs, sorted for display.
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.lock().keys().cloned().collect();
        urls.sort();
        urls
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
