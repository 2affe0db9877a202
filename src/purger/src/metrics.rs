//! Purge counters
//!
//! Thread-safe counters shared by the delete workers of a target.

use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for one purge target (or a whole run)
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    inner: Arc<CountersInner>,
}

#[derive(Debug, Default)]
struct CountersInner {
    /// Objects seen while listing
    considered: AtomicU64,
    /// Objects left alone: unclassifiable, outside the filter
    filtered_out: AtomicU64,
    /// Objects deleted (or already absent)
    deleted: AtomicU64,
    /// Objects whose delete failed twice
    skipped: AtomicU64,
    /// Size of the deleted objects
    bytes_reclaimed: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_considered(&self) {
        self.inner.considered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered_out(&self) {
        self.inner.filtered_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self, size_bytes: u64) {
        self.inner.deleted.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_reclaimed
            .fetch_add(size_bytes, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.inner.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn considered(&self) -> u64 {
        self.inner.considered.load(Ordering::Relaxed)
    }

    pub fn filtered_out(&self) -> u64 {
        self.inner.filtered_out.load(Ordering::Relaxed)
    }

    pub fn deleted(&self) -> u64 {
        self.inner.deleted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    pub fn bytes_reclaimed(&self) -> u64 {
        self.inner.bytes_reclaimed.load(Ordering::Relaxed)
    }

    /// Snapshot of the counters. Only meaningful once every worker that shares
    /// them has finished.
    pub fn summary(&self) -> CountersSummary {
        CountersSummary {
            considered: self.considered(),
            filtered_out: self.filtered_out(),
            deleted: self.deleted(),
            skipped: self.skipped(),
            bytes_reclaimed: self.bytes_reclaimed(),
        }
    }
}

/// Counters at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSummary {
    pub considered: u64,
    pub filtered_out: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub bytes_reclaimed: u64,
}

impl AddAssign for CountersSummary {
    fn add_assign(&mut self, other: Self) {
        self.considered += other.considered;
        self.filtered_out += other.filtered_out;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.bytes_reclaimed += other.bytes_reclaimed;
    }
}

impl CountersSummary {
    /// Format bytes as MB with 2 decimal places
    pub fn format_mb(bytes: u64) -> String {
        format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
    }

    /// Log the summary
    pub fn log(&self, label: &str) {
        tracing::info!(
            considered = self.considered,
            filtered_out = self.filtered_out,
            deleted = self.deleted,
            skipped = self.skipped,
            reclaimed_mb = %Self::format_mb(self.bytes_reclaimed),
            "{label}"
        );
    }
}
