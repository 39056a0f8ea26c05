//! Identifier value types used throughout the bus.
//!
//! All identifiers are cheap to clone and compare by value:
//!
//! - [`EventType`] - routing key selecting the channel a message belongs to
//! - [`MessageId`] - unique per send, never reused
//! - [`CorrelationId`] - ties a reply to the request it answers
//! - [`SubscriptionId`] - handle for detaching a subscriber
//! - [`ChannelId`] - process-local identity of a channel instance

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// The routing key identifying which channel a message belongs to.
///
/// Event types compare by value and are cheap to clone, so they can be
/// used freely as map keys and carried inside every processing context.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(Arc<str>);

impl EventType {
    /// Create an event type from its textual name.
    pub fn of(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The textual name of this event type.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({})", self.0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The unique identity of a single `send` call.
///
/// A fresh id is generated for every message entering the bus; ids are
/// never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a new, globally unique message id.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Ties a reply message to the request it answers.
///
/// A correlation id derived via [`CorrelationId::answer_to`] carries the
/// value of the originating [`MessageId`], so the requester can recognize
/// its reply with [`CorrelationId::matches`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation id unrelated to any message.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive the correlation id answering the given message.
    pub fn answer_to(message_id: &MessageId) -> Self {
        Self(message_id.0)
    }

    /// Whether this correlation id answers the given message.
    pub fn matches(&self, message_id: &MessageId) -> bool {
        self.0 == message_id.0
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

/// Handle returned by a subscribe call, used to detach the subscriber.
///
/// Subscription ids are globally unique and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a new, globally unique subscription id.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Handle returned when registering a dynamic exception listener on the
/// bus, used to unregister it again.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionListenerId(Uuid);

impl ExceptionListenerId {
    /// Generate a new, globally unique listener id.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for ExceptionListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExceptionListenerId({})", self.0)
    }
}

/// Process-local identity of a channel instance.
///
/// Recorded in processing frames so a context's traversal history can
/// name the channels it visited.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocate the next channel id.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        let a = MessageId::fresh();
        let b = MessageId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn answer_correlation_matches_its_message() {
        let id = MessageId::fresh();
        let correlation = CorrelationId::answer_to(&id);
        assert!(correlation.matches(&id));
        assert!(!correlation.matches(&MessageId::fresh()));
    }

    #[test]
    fn fresh_correlation_matches_nothing() {
        let id = MessageId::fresh();
        assert!(!CorrelationId::fresh().matches(&id));
    }

    #[test]
    fn event_types_compare_by_value() {
        assert_eq!(EventType::of("order.placed"), EventType::of("order.placed"));
        assert_ne!(EventType::of("order.placed"), EventType::of("order.paid"));
    }

    #[test]
    fn channel_ids_are_distinct() {
        assert_ne!(ChannelId::fresh(), ChannelId::fresh());
    }
}
