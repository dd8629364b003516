use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide proxy counters.
///
/// `bandwidth_saved_bytes` and `time_saved_ms` are the cache savings
/// reported to the operator. Everything else is operational detail.
#[derive(Debug, Default)]
pub struct ProxyStats {
    bandwidth_saved_bytes: AtomicU64,
    time_saved_ms: AtomicU64,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    requests_blocked: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    tunnels_opened: AtomicU64,
    upstream_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bandwidth_saved_bytes: u64,
    pub time_saved_ms: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub requests_blocked: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub tunnels_opened: u64,
    pub upstream_failures: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache hit served `body_len` bytes that took `fetch_duration_ms`
    /// to fetch originally. Bytes count twice: not sent upstream and not
    /// received again.
    pub fn record_hit(&self, body_len: usize, fetch_duration_ms: u64) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.bandwidth_saved_bytes
            .fetch_add(2 * body_len as u64, Ordering::Relaxed);
        self.time_saved_ms
            .fetch_add(fetch_duration_ms, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_savings(&self) {
        self.bandwidth_saved_bytes.store(0, Ordering::Relaxed);
        self.time_saved_ms.store(0, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    pub fn request_blocked(&self) {
        self.requests_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tunnel_opened(&self) {
        self.tunnels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_failed(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn savings(&self) -> (u64, u64) {
        (
            self.bandwidth_saved_bytes.load(Ordering::Relaxed),
            self.time_saved_ms.load(Ordering::Relaxed),
        )
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (bandwidth_saved_bytes, time_saved_ms) = self.savings();
        StatsSnapshot {
            bandwidth_saved_bytes,
            time_saved_ms,
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            requests_blocked: self.requests_blocked.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            tunnels_opened: self.tunnels_opened.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            "[stats] connections={} active={} blocked={} hits={} misses={} tunnels={} failures={} saved={}B/{}ms",
            s.connections_total,
            s.connections_active,
            s.requests_blocked,
            s.cache_hits,
            s.cache_misses,
            s.tunnels_opened,
            s.upstream_failures,
            s.bandwidth_saved_bytes,
            s.time_saved_ms,
        );
    }
}
