//! # Exception Handling
//!
//! Policy hooks for errors raised by filters and subscribers.
//!
//! Errors never tear down workers or poison a channel: the engine
//! routes every error through the configured [`ExceptionHandler`],
//! counts the message as failed where the contract says so, and moves
//! on to the next message.

use crate::context::ProcessingContext;
use omnibus_core::{BoxError, Message};

/// Decides how a channel reacts to errors from filters and subscribers.
///
/// Handlers run inline on the delivering thread. The reporting hooks
/// ([`on_delivery_error`](Self::on_delivery_error),
/// [`on_filter_error`](Self::on_filter_error)) fire exactly once per
/// originating error.
pub trait ExceptionHandler<T: Message>: Send + Sync {
    /// Whether a subscriber error aborts delivery to the remaining
    /// subscribers of the same message. Defaults to aborting.
    fn should_abort_delivery(&self, _context: &ProcessingContext<T>, _error: &BoxError) -> bool {
        true
    }

    /// A subscriber or action raised an error while handling a message.
    fn on_delivery_error(&self, context: &ProcessingContext<T>, error: BoxError);

    /// A filter raised an error; the message will travel no further.
    fn on_filter_error(&self, context: &ProcessingContext<T>, error: BoxError);
}

/// Default handler: log the error and abort delivery.
pub struct LoggingExceptionHandler;

impl<T: Message> ExceptionHandler<T> for LoggingExceptionHandler {
    fn on_delivery_error(&self, context: &ProcessingContext<T>, error: BoxError) {
        tracing::error!(message_id = %context.message_id(), %error, "message delivery failed");
    }

    fn on_filter_error(&self, context: &ProcessingContext<T>, error: BoxError) {
        tracing::error!(message_id = %context.message_id(), %error, "filter raised an error");
    }
}
