//! Pipe statistics: monotonic counters and point-in-time snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// A point-in-time snapshot of a pipe's counters.
///
/// Counters are monotonic for the lifetime of the pipe; snapshots are
/// eventually consistent and timestamped at capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeStatistics {
    /// When the snapshot was taken.
    pub timestamp: SystemTime,
    /// Messages accepted by `send`.
    pub accepted: u64,
    /// Messages accepted but not yet picked up by a worker.
    pub queued: u64,
    /// Messages whose delivery function completed without error.
    pub successful: u64,
    /// Messages whose delivery function failed.
    pub failed: u64,
}

/// Lock-free counter set backing [`PipeStatistics`] snapshots.
#[derive(Debug, Default)]
pub(crate) struct PipeStatisticsCollector {
    accepted: AtomicU64,
    queued: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl PipeStatisticsCollector {
    pub(crate) fn message_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_dequeued(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn message_delivered(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn queued_now(&self) -> u64 {
        self.queued.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> PipeStatistics {
        PipeStatistics {
            timestamp: SystemTime::now(),
            accepted: self.accepted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
