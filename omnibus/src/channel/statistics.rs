//! Per-channel delivery counters.
//!
//! Extends the pipe-level counters with the filter verdicts a channel
//! can produce. Counters are monotonic except `queued`; snapshots are
//! taken without pausing traffic and may be mid-flight by one message.

use crate::pipe::PipeStatistics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// A point-in-time snapshot of a channel's counters.
#[derive(Debug, Clone, Copy)]
pub struct ChannelStatistics {
    /// When this snapshot was taken.
    pub timestamp: SystemTime,
    /// Messages accepted into the channel.
    pub accepted: u64,
    /// Messages currently waiting in the accepting pipe's queue.
    pub queued: u64,
    /// Messages blocked by a filter.
    pub blocked: u64,
    /// Messages forgotten by a filter.
    pub forgotten: u64,
    /// Messages whose payload a filter replaced.
    pub replaced: u64,
    /// Messages whose action completed without error.
    pub successful: u64,
    /// Messages whose filter or action raised an error.
    pub failed: u64,
}

#[derive(Default)]
pub(crate) struct ChannelStatisticsCollector {
    blocked: AtomicU64,
    forgotten: AtomicU64,
    replaced: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl ChannelStatisticsCollector {
    pub(crate) fn message_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_forgotten(&self) {
        self.forgotten.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_replaced(&self) {
        self.replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_delivered(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Merge with the accepting pipe's counters into one snapshot.
    pub(crate) fn snapshot(&self, pipe: &PipeStatistics) -> ChannelStatistics {
        ChannelStatistics {
            timestamp: SystemTime::now(),
            accepted: pipe.accepted,
            queued: pipe.queued,
            blocked: self.blocked.load(Ordering::Relaxed),
            forgotten: self.forgotten.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
