use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free query counters shared by the read loop and forward tasks.
#[derive(Debug, Default)]
pub struct Stats {
    queries_total: AtomicU64,
    queries_blocked: AtomicU64,
    queries_malformed: AtomicU64,
    queries_forwarded: AtomicU64,
    upstream_failures: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_query(&self) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.queries_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.queries_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.queries_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_blocked: self.queries_blocked.load(Ordering::Relaxed),
            queries_malformed: self.queries_malformed.load(Ordering::Relaxed),
            queries_forwarded: self.queries_forwarded.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`]. Counters are read one by one, so a
/// snapshot taken under load may be off by the queries in flight.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// DNS queries seen, malformed ones included
    pub queries_total: u64,
    pub queries_blocked: u64,
    pub queries_malformed: u64,
    pub queries_forwarded: u64,
    /// Forwards that ended without a response from any resolver
    pub upstream_failures: u64,
}

impl StatsSnapshot {
    /// Share of well-formed queries that were blocked (0.0 to 1.0)
    pub fn block_rate(&self) -> f64 {
        let decided = self.queries_total.saturating_sub(self.queries_malformed);
        if decided == 0 {
            return 0.0;
        }
        self.queries_blocked as f64 / decided as f64
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} blocked={} malformed={} forwarded={} upstream_failures={} block_rate={:.1}%",
            self.queries_total,
            self.queries_blocked,
            self.queries_malformed,
            self.queries_forwarded,
            self.upstream_failures,
            self.block_rate() * 100.0
        )
    }
}
