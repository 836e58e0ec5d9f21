//! Read session statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by the partition tasks of one read.
#[derive(Debug, Default)]
pub struct ReadStats {
    delivered: AtomicU64,
    filtered: AtomicU64,
    decode_errors: AtomicU64,
    partition_errors: AtomicU64,
}

impl ReadStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_partition_error(&self) {
        self.partition_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> ReadStatsSnapshot {
        ReadStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            partition_errors: self.partition_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counters of a read session at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStatsSnapshot {
    /// Records handed to the record channel.
    pub delivered: u64,
    /// Records dropped by the filter.
    pub filtered: u64,
    /// Delivered records carrying a decode error.
    pub decode_errors: u64,
    /// Partitions that stopped on a consumer error.
    pub partition_errors: u64,
}
