//! # Actions
//!
//! What happens to a context once it has cleared a channel's three
//! filter stages. A channel is configured with a default action; any
//! filter may override it for the current visit via
//! [`ProcessingContext::set_action`].

use crate::context::ProcessingContext;
use arc_swap::ArcSwap;
use omnibus_core::{AcceptingBehavior, Message, Subscriber, SubscriptionId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Channel;

/// The terminal or forwarding behavior selected for a channel visit.
pub enum Action<T: Message> {
    /// Hand the context to a terminal callback.
    Consume(Consume<T>),
    /// Forward the context to another channel, not expecting it back.
    Jump(Arc<Channel<T>>),
    /// Forward the context to another channel, expecting it back via
    /// [`Action::Return`].
    Call(Call<T>),
    /// Resume the most recent outstanding call in this context's
    /// history.
    Return,
    /// Fan the context out to a mutable set of subscribers.
    Subscription(Subscription<T>),
}

impl<T: Message> Action<T> {
    /// A consume action from a closure.
    pub fn consume(consumer: impl Fn(ProcessingContext<T>) + Send + Sync + 'static) -> Self {
        Action::Consume(Consume(Arc::new(consumer)))
    }

    /// A jump action targeting the given channel.
    pub fn jump(target: Arc<Channel<T>>) -> Self {
        Action::Jump(target)
    }

    /// A subscription action with an initially empty subscriber set.
    pub fn subscription() -> Self {
        Action::Subscription(Subscription::new())
    }

    /// The variant of this action, for inspection of frame histories.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Consume(_) => ActionKind::Consume,
            Action::Jump(_) => ActionKind::Jump,
            Action::Call(_) => ActionKind::Call,
            Action::Return => ActionKind::Return,
            Action::Subscription(_) => ActionKind::Subscription,
        }
    }

}

impl<T: Message> Clone for Action<T> {
    fn clone(&self) -> Self {
        match self {
            Action::Consume(consume) => Action::Consume(consume.clone()),
            Action::Jump(target) => Action::Jump(target.clone()),
            Action::Call(call) => Action::Call(call.clone()),
            Action::Return => Action::Return,
            Action::Subscription(subscription) => Action::Subscription(subscription.clone()),
        }
    }
}

impl<T: Message> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action::{:?}", self.kind())
    }
}

/// The variant of an [`Action`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// See [`Action::Consume`].
    Consume,
    /// See [`Action::Jump`].
    Jump,
    /// See [`Action::Call`].
    Call,
    /// See [`Action::Return`].
    Return,
    /// See [`Action::Subscription`].
    Subscription,
}

/// A terminal callback receiving the full context.
pub struct Consume<T: Message>(Arc<dyn Fn(ProcessingContext<T>) + Send + Sync>);

impl<T: Message> Consume<T> {
    pub(crate) fn invoke(&self, context: ProcessingContext<T>) {
        (self.0)(context);
    }
}

impl<T: Message> Clone for Consume<T> {
    fn clone(&self) -> Self {
        Consume(self.0.clone())
    }
}

/// A call into another channel that a later `Return` resumes.
///
/// The call names only its target; whether it has been returned is
/// tracked per visit in the context's frame history, so one `Call`
/// value may be cloned onto any number of contexts.
pub struct Call<T: Message> {
    target: Arc<Channel<T>>,
}

impl<T: Message> Call<T> {
    /// A call targeting the given channel.
    pub fn to(target: Arc<Channel<T>>) -> Self {
        Self { target }
    }

    /// The channel this call hands the context to.
    pub fn target(&self) -> &Arc<Channel<T>> {
        &self.target
    }
}

impl<T: Message> Clone for Call<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

pub(crate) enum SubscriberKind<T: Message> {
    /// Receives the bare payload.
    Payload(Arc<dyn Subscriber<T>>),
    /// Receives the whole context.
    Raw(Arc<dyn Subscriber<ProcessingContext<T>>>),
}

pub(crate) struct SubscriberEntry<T: Message> {
    pub(crate) id: SubscriptionId,
    pub(crate) kind: SubscriberKind<T>,
}

impl<T: Message> Clone for SubscriberEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: match &self.kind {
                SubscriberKind::Payload(s) => SubscriberKind::Payload(s.clone()),
                SubscriberKind::Raw(s) => SubscriberKind::Raw(s.clone()),
            },
        }
    }
}

/// A concurrently mutable subscriber registry.
///
/// Additions and removals swap in a new list; deliveries already under
/// way keep iterating the list they snapshotted.
pub struct Subscription<T: Message> {
    entries: Arc<ArcSwap<Vec<SubscriberEntry<T>>>>,
}

impl<T: Message> Subscription<T> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Register a payload subscriber, returning its handle.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> SubscriptionId {
        self.add(SubscriberKind::Payload(subscriber))
    }

    /// Register a subscriber receiving the whole context.
    pub fn subscribe_raw(
        &self,
        subscriber: Arc<dyn Subscriber<ProcessingContext<T>>>,
    ) -> SubscriptionId {
        self.add(SubscriberKind::Raw(subscriber))
    }

    fn add(&self, kind: SubscriberKind<T>) -> SubscriptionId {
        let entry = SubscriberEntry {
            id: SubscriptionId::fresh(),
            kind,
        };
        self.entries.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(entry.clone());
            next
        });
        entry.id
    }

    /// Remove a subscriber; returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = AtomicBool::new(false);
        self.entries.rcu(|current| {
            removed.store(
                current.iter().any(|entry| entry.id == id),
                Ordering::Relaxed,
            );
            current
                .iter()
                .filter(|entry| entry.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        removed.load(Ordering::Relaxed)
    }

    /// Handles of all currently registered subscribers.
    pub fn subscriber_ids(&self) -> Vec<SubscriptionId> {
        self.entries.load().iter().map(|entry| entry.id).collect()
    }

    /// Number of currently registered subscribers.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Whether no subscribers are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<SubscriberEntry<T>>> {
        self.entries.load_full()
    }

    /// Deliver a bare payload to a subscriber entry.
    pub(crate) fn deliver(
        entry: &SubscriberEntry<T>,
        context: &ProcessingContext<T>,
    ) -> Result<AcceptingBehavior, omnibus_core::BoxError> {
        match &entry.kind {
            SubscriberKind::Payload(subscriber) => subscriber.accept(context.payload()),
            SubscriberKind::Raw(subscriber) => subscriber.accept(context),
        }
    }
}

impl<T: Message> Default for Subscription<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Message> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: Message> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscribers", &self.len())
            .finish()
    }
}
