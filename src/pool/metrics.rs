// ABOUTME: Metrics and observability for the session pool
//
// Tracks:
// - Connects: attempts, failures, timeouts
// - Checkouts: fast-path reuses, stale replacements
// - Retirement: evictions, reaped sessions, close failures
// - Resident sessions

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Pool-level counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub connects: AtomicU64,
    pub connect_failures: AtomicU64,
    pub connect_timeouts: AtomicU64,
    pub reuses: AtomicU64,
    pub stale_replaced: AtomicU64,
    pub evictions: AtomicU64,
    pub reaped: AtomicU64,
    pub close_failures: AtomicU64,
    pub resident: AtomicU32,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connects: u64,
    pub connect_failures: u64,
    pub connect_timeouts: u64,
    pub reuses: u64,
    pub stale_replaced: u64,
    pub evictions: u64,
    pub reaped: u64,
    pub close_failures: u64,
    pub resident: u32,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_succeeded(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failed(&self, timed_out: bool) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.connect_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reused(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_replaced(&self) {
        self.stale_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn reaped(&self, count: u64) {
        self.reaped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn close_failed(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_resident(&self, count: usize) {
        #[allow(clippy::cast_possible_truncation)]
        self.resident.store(count as u32, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connect_timeouts: self.connect_timeouts.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            stale_replaced: self.stale_replaced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            resident: self.resident.load(Ordering::Relaxed),
        }
    }
}
