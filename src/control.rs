//! Operator command surface.
//!
//! Front ends (the stdin console, or anything else embedding the proxy)
//! drive the running proxy through [`ProxyControl`]. It shares the same
//! blocklist, cache and counters the connection handlers use.

use std::sync::Arc;

use tracing::info;

use crate::blocklist::{BlockOutcome, Blocklist, UnblockOutcome};
use crate::cache::CacheStore;
use crate::stats::{ProxyStats, StatsSnapshot};

#[derive(Clone)]
pub struct ProxyControl {
    blocklist: Arc<Blocklist>,
    cache: Arc<CacheStore>,
    stats: Arc<ProxyStats>,
}

impl ProxyControl {
    pub fn new(blocklist: Arc<Blocklist>, cache: Arc<CacheStore>, stats: Arc<ProxyStats>) -> Self {
        Self {
            blocklist,
            cache,
            stats,
        }
    }

    pub fn block(&self, pattern: &str) -> BlockOutcome {
        let outcome = self.blocklist.block(pattern);
        if outcome == BlockOutcome::Added {
            info!("Blocked pattern {}", pattern);
        }
        outcome
    }

    pub fn unblock(&self, pattern: &str) -> UnblockOutcome {
        let outcome = self.blocklist.unblock(pattern);
        if outcome == UnblockOutcome::Removed {
            info!("Unblocked pattern {}", pattern);
        }
        outcome
    }

    pub fn is_blocked(&self, candidate: &str) -> bool {
        self.blocklist.is_blocked(candidate)
    }

    pub fn list_blocked(&self) -> Vec<String> {
        self.blocklist.list()
    }

    pub fn list_cached(&self) -> Vec<String> {
        self.cache.urls()
    }

    pub fn clear_cache(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!("Cache cleared ({} entries dropped)", dropped);
    }

    /// `(bytes saved, milliseconds saved)` by cache hits.
    pub fn savings(&self) -> (u64, u64) {
        self.stats.savings()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn control() -> (ProxyControl, Arc<CacheStore>) {
        let stats = Arc::new(ProxyStats::new());
        let cache = Arc::new(CacheStore::new(Arc::clone(&stats), false));
        let control = ProxyControl::new(Arc::new(Blocklist::new()), Arc::clone(&cache), stats);
        (control, cache)
    }

    #[test]
    fn test_block_commands_reach_shared_list() {
        let (control, _) = control();
        assert_eq!(control.block("ads.example.com"), BlockOutcome::Added);
        assert_eq!(control.block("ads.example.com"), BlockOutcome::AlreadyBlocked);
        assert!(control.is_blocked("http://ads.example.com/banner"));
        assert_eq!(control.list_blocked(), vec!["ads.example.com"]);
        assert_eq!(control.unblock("ads.example.com"), UnblockOutcome::Removed);
        assert_eq!(control.unblock("ads.example.com"), UnblockOutcome::NotBlocked);
        assert!(!control.is_blocked("http://ads.example.com/banner"));
    }

    #[test]
    fn test_cache_commands() {
        let (control, cache) = control();
        cache.put("http://a.local/", Bytes::from_static(b"hello"), 50);
        assert_eq!(control.list_cached(), vec!["http://a.local/"]);

        cache.get("http://a.local/");
        assert_eq!(control.savings(), (10, 50));

        control.clear_cache();
        assert!(control.list_cached().is_empty());
        assert_eq!(control.stats().bandwidth_saved_bytes, 10);
    }
}
