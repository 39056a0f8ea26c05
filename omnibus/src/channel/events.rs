//! Hooks observing filter verdicts on a channel.

use crate::context::ProcessingContext;
use omnibus_core::Message;

/// Observes the non-passing verdicts filters produce on a channel.
///
/// All hooks default to no-ops; implement only the ones of interest.
/// Hooks run inline on the delivering thread and should return quickly.
pub trait ChannelEventListener<T: Message>: Send + Sync {
    /// A filter blocked the message.
    fn message_blocked(&self, _context: &ProcessingContext<T>) {}

    /// A filter forgot (silently dropped) the message.
    fn message_forgotten(&self, _context: &ProcessingContext<T>) {}

    /// A filter replaced the message's payload.
    fn message_replaced(&self, _context: &ProcessingContext<T>) {}
}

/// Default listener tracing each verdict at debug level.
pub struct TracingEventListener;

impl<T: Message> ChannelEventListener<T> for TracingEventListener {
    fn message_blocked(&self, context: &ProcessingContext<T>) {
        tracing::debug!(message_id = %context.message_id(), "message blocked by filter");
    }

    fn message_forgotten(&self, context: &ProcessingContext<T>) {
        tracing::debug!(message_id = %context.message_id(), "message forgotten by filter");
    }

    fn message_replaced(&self, context: &ProcessingContext<T>) {
        tracing::debug!(message_id = %context.message_id(), "message payload replaced by filter");
    }
}
