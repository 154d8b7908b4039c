use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct SyncMetrics {
    fetches_started: AtomicU64,
    fetches_applied: AtomicU64,
    stale_discarded: AtomicU64,
    ticks_coalesced: AtomicU64,
    mutations: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub fetches_started: u64,
    pub fetches_applied: u64,
    pub stale_discarded: u64,
    /// Refresh requests skipped because another refresh was in flight.
    pub ticks_coalesced: u64,
    pub mutations: u64,
    pub failures: u64,
}

impl SyncMetrics {
    pub fn fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_applied(&self) {
        self.fetches_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_discarded(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_coalesced(&self) {
        self.ticks_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mutation(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_applied: self.fetches_applied.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            ticks_coalesced: self.ticks_coalesced.load(Ordering::Relaxed),
            mutations: self.mutations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
