//! Bus-wide counter snapshots and configuration views.

use crate::channel::Channel;
use omnibus_core::{EventType, Message, SubscriptionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// A point-in-time aggregation of the bus's counters.
///
/// `accepted` and `queued` describe the shared accepting channel; the
/// remaining counters also sum over every per-event-type delivery
/// channel. Snapshots are taken without pausing traffic.
#[derive(Debug, Clone, Copy)]
pub struct MessageBusStatistics {
    /// When this snapshot was taken.
    pub timestamp: SystemTime,
    /// Messages accepted into the bus.
    pub accepted: u64,
    /// Messages currently waiting in the accepting queue.
    pub queued: u64,
    /// Messages blocked by a filter.
    pub blocked: u64,
    /// Messages forgotten by a filter.
    pub forgotten: u64,
    /// Messages whose payload a filter replaced.
    pub replaced: u64,
    /// Messages delivered to their subscribers without error.
    pub successful: u64,
    /// Messages whose filter or subscriber raised an error.
    pub failed: u64,
}

/// The bus's counters and routing configuration at one point in time.
pub struct MessageBusStatusInformation<T: Message> {
    /// Aggregated counter snapshot.
    pub statistics: MessageBusStatistics,
    /// The delivery channel of every event type seen so far.
    pub channels: HashMap<EventType, Arc<Channel<T>>>,
    /// The subscriber handles registered per event type.
    pub subscribers: HashMap<EventType, Vec<SubscriptionId>>,
}

impl<T: Message> MessageBusStatusInformation<T> {
    /// The delivery channel for an event type, if one exists yet.
    pub fn channel_for(&self, event_type: &EventType) -> Option<&Arc<Channel<T>>> {
        self.channels.get(event_type)
    }

    /// The subscriber handles for an event type.
    pub fn subscribers_of(&self, event_type: &EventType) -> &[SubscriptionId] {
        self.subscribers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All subscriber handles across every event type.
    pub fn all_subscribers(&self) -> Vec<SubscriptionId> {
        self.subscribers.values().flatten().copied().collect()
    }
}
