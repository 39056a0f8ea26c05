//! # Subscriber Contract
//!
//! Subscribers are the terminal consumers of a subscription channel.
//! Delivery is a synchronous fan-out on the delivering thread: every
//! subscriber receives the message and answers with an
//! [`AcceptingBehavior`] deciding whether it stays subscribed.
//!
//! Returning [`AcceptingBehavior::Unsubscribe`] detaches the subscriber
//! after the current delivery, which enables "answer once then detach"
//! patterns such as reply correlation.

use crate::error::BoxError;

/// A subscriber's per-delivery signal to remain subscribed or auto-detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptingBehavior {
    /// Keep the subscription for future deliveries.
    Remain,
    /// Detach this subscriber once the current delivery completes.
    Unsubscribe,
}

/// A terminal consumer of delivered messages.
///
/// An error aborts nothing by itself: it is routed to the channel's
/// exception policy, which decides whether the remaining subscribers in
/// the same fan-out still receive the message.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a `Subscriber` for `{M}`",
    label = "missing `Subscriber` implementation",
    note = "Subscribers receive `&{M}` and answer with an `AcceptingBehavior`."
)]
pub trait Subscriber<M>: Send + Sync + 'static {
    /// Receive one delivered message.
    fn accept(&self, message: &M) -> Result<AcceptingBehavior, BoxError>;
}

impl<M, F> Subscriber<M> for F
where
    F: Fn(&M) -> Result<AcceptingBehavior, BoxError> + Send + Sync + 'static,
{
    fn accept(&self, message: &M) -> Result<AcceptingBehavior, BoxError> {
        self(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_subscribers() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        let subscriber = |message: &u64| {
            SEEN.fetch_add(*message as usize, Ordering::SeqCst);
            Ok(AcceptingBehavior::Remain)
        };
        subscriber.accept(&40).unwrap();
        subscriber.accept(&2).unwrap();
        assert_eq!(SEEN.load(Ordering::SeqCst), 42);
    }
}
