//! Metrics registry for emberdb
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed atomics: counters are informational and never gate behavior

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one open database.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    records_inserted: AtomicU64,
    records_updated: AtomicU64,
    records_deleted: AtomicU64,
    flushes: AtomicU64,
    bytes_appended: AtomicU64,
    rewrites: AtomicU64,
    lines_skipped: AtomicU64,
    indexed_queries: AtomicU64,
    streaming_queries: AtomicU64,
    index_rebuilds: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_inserted(&self, n: u64) {
        self.records_inserted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_updated(&self, n: u64) {
        self.records_updated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_deleted(&self, n: u64) {
        self.records_deleted.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one append flush of `bytes` bytes
    pub fn record_flush(&self, bytes: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_rewrites(&self) {
        self.rewrites.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_lines_skipped(&self, n: u64) {
        self.lines_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_indexed_queries(&self) {
        self.indexed_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_streaming_queries(&self) {
        self.streaming_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_index_rebuilds(&self) {
        self.index_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            records_updated: self.records_updated.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            rewrites: self.rewrites.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            indexed_queries: self.indexed_queries.load(Ordering::Relaxed),
            streaming_queries: self.streaming_queries.load(Ordering::Relaxed),
            index_rebuilds: self.index_rebuilds.load(Ordering::Relaxed),
        }
    }

    /// Current snapshot as a JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub flushes: u64,
    pub bytes_appended: u64,
    pub rewrites: u64,
    pub lines_skipped: u64,
    pub indexed_queries: u64,
    pub streaming_queries: u64,
    pub index_rebuilds: u64,
}
