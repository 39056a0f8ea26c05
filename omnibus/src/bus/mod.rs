//! # Message Bus
//!
//! Publish/subscribe over event types. The bus owns one shared
//! accepting channel carrying the bus-wide filters and the optional
//! worker pool, whose terminal action routes each context by its event
//! type into a per-event-type delivery channel. Delivery channels are
//! synchronous, created lazily on first use, and terminate in a
//! subscription fanning the message out to that event type's
//! subscribers.
//!
//! Backpressure therefore lives in one place: the accepting channel's
//! queue. Once a message is routed, delivery runs to completion on the
//! worker (or, for a synchronous bus, the sender's) thread.

mod status;

pub use status::{MessageBusStatistics, MessageBusStatusInformation};

use crate::channel::action::{Action, Subscription};
use crate::channel::{Channel, ChannelFilter};
use crate::context::ProcessingContext;
use crate::error::PipeError;
use crate::exceptions::{ExceptionHandler, LoggingExceptionHandler};
use crate::pipe::AsynchronousConfiguration;
use arc_swap::ArcSwap;
use omnibus_core::{
    BoxError, CorrelationId, EventType, ExceptionListenerId, FilterStage, Message, MessageId,
    Subscriber, SubscriptionId,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Observes errors for one event type, registered dynamically on a
/// running bus.
///
/// Listeners are reporting hooks only; the abort decision stays with
/// the bus's [`ExceptionHandler`].
pub trait ExceptionListener<T: Message>: Send + Sync {
    /// A filter or subscriber raised an error for a matching message.
    fn on_exception(&self, context: &ProcessingContext<T>, error: &BoxError);
}

impl<T: Message, F> ExceptionListener<T> for F
where
    F: Fn(&ProcessingContext<T>, &BoxError) + Send + Sync,
{
    fn on_exception(&self, context: &ProcessingContext<T>, error: &BoxError) {
        self(context, error)
    }
}

struct ListenerEntry<T: Message> {
    id: ExceptionListenerId,
    event_type: EventType,
    listener: Arc<dyn ExceptionListener<T>>,
}

impl<T: Message> Clone for ListenerEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            event_type: self.event_type.clone(),
            listener: self.listener.clone(),
        }
    }
}

/// The dynamic exception listener registry shared by all channels of a
/// bus.
struct ListenerRegistry<T: Message> {
    entries: ArcSwap<Vec<ListenerEntry<T>>>,
}

impl<T: Message> ListenerRegistry<T> {
    fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn register(
        &self,
        event_type: EventType,
        listener: Arc<dyn ExceptionListener<T>>,
    ) -> ExceptionListenerId {
        let entry = ListenerEntry {
            id: ExceptionListenerId::fresh(),
            event_type,
            listener,
        };
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            next.push(entry.clone());
            next
        });
        entry.id
    }

    fn unregister(&self, id: ExceptionListenerId) -> bool {
        let mut removed = false;
        self.entries.rcu(|current| {
            removed = current.iter().any(|entry| entry.id == id);
            current
                .iter()
                .filter(|entry| entry.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        removed
    }

    fn notify(&self, context: &ProcessingContext<T>, error: &BoxError) {
        let entries = self.entries.load();
        for entry in entries.iter() {
            if context.event_type() == Some(&entry.event_type) {
                entry.listener.on_exception(context, error);
            }
        }
    }
}

/// The exception handler installed on every channel of a bus.
///
/// Notifies the matching dynamic listeners, then defers to the
/// configured policy. Each originating error passes through here
/// exactly once, so listeners fire once per error.
struct BridgingExceptionHandler<T: Message> {
    policy: Arc<dyn ExceptionHandler<T>>,
    listeners: Arc<ListenerRegistry<T>>,
}

impl<T: Message> ExceptionHandler<T> for BridgingExceptionHandler<T> {
    fn should_abort_delivery(&self, context: &ProcessingContext<T>, error: &BoxError) -> bool {
        self.policy.should_abort_delivery(context, error)
    }

    fn on_delivery_error(&self, context: &ProcessingContext<T>, error: BoxError) {
        self.listeners.notify(context, &error);
        self.policy.on_delivery_error(context, error);
    }

    fn on_filter_error(&self, context: &ProcessingContext<T>, error: BoxError) {
        self.listeners.notify(context, &error);
        self.policy.on_filter_error(context, error);
    }
}

struct DeliveryChannel<T: Message> {
    channel: Arc<Channel<T>>,
    subscription: Subscription<T>,
}

impl<T: Message> Clone for DeliveryChannel<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            subscription: self.subscription.clone(),
        }
    }
}

/// State shared between the bus handle and the router running on the
/// accepting channel's threads.
struct BusState<T: Message> {
    channels: RwLock<HashMap<EventType, DeliveryChannel<T>>>,
    subscriptions: RwLock<HashMap<SubscriptionId, EventType>>,
    listeners: Arc<ListenerRegistry<T>>,
    bridge: Arc<BridgingExceptionHandler<T>>,
}

impl<T: Message> BusState<T> {
    /// The delivery channel for an event type, created on first use.
    fn delivery_channel(&self, event_type: &EventType) -> DeliveryChannel<T> {
        if let Some(delivery) = self.channels.read().get(event_type) {
            return delivery.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(event_type.clone())
            .or_insert_with(|| {
                let subscription = Subscription::new();
                let channel = Channel::builder(Action::Subscription(subscription.clone()))
                    .exception_handler(self.bridge.clone())
                    .build();
                tracing::debug!(%event_type, channel_id = ?channel.id(), "created delivery channel");
                DeliveryChannel {
                    channel: Arc::new(channel),
                    subscription,
                }
            })
            .clone()
    }
}

/// Configures and builds a [`MessageBus`].
pub struct MessageBusBuilder<T: Message> {
    asynchronous: Option<AsynchronousConfiguration>,
    exception_handler: Option<Arc<dyn ExceptionHandler<T>>>,
}

impl<T: Message> MessageBusBuilder<T> {
    /// Start building a synchronous bus.
    pub fn new() -> Self {
        Self {
            asynchronous: None,
            exception_handler: None,
        }
    }

    /// Accept messages through a worker pool instead of inline.
    pub fn asynchronous(mut self, configuration: AsynchronousConfiguration) -> Self {
        self.asynchronous = Some(configuration);
        self
    }

    /// React to filter and subscriber errors with the given policy.
    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler<T>>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Wire the accepting channel and start workers if configured
    /// asynchronous.
    pub fn build(self) -> MessageBus<T> {
        let listeners = Arc::new(ListenerRegistry::new());
        let bridge = Arc::new(BridgingExceptionHandler {
            policy: self
                .exception_handler
                .unwrap_or_else(|| Arc::new(LoggingExceptionHandler)),
            listeners: listeners.clone(),
        });
        let state = Arc::new(BusState {
            channels: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            listeners,
            bridge: bridge.clone(),
        });

        let router_state = state.clone();
        let router = Action::consume(move |context: ProcessingContext<T>| {
            let Some(event_type) = context.event_type().cloned() else {
                tracing::warn!(
                    message_id = %context.message_id(),
                    "message carries no event type; dropped"
                );
                return;
            };
            let delivery = router_state.delivery_channel(&event_type);
            if let Err(error) = delivery.channel.accept_routed(context) {
                tracing::error!(%event_type, %error, "delivery channel rejected the message");
            }
        });

        let mut accepting = Channel::builder(router).exception_handler(bridge);
        if let Some(configuration) = self.asynchronous {
            accepting = accepting.asynchronous(configuration);
        }

        MessageBus {
            accepting_channel: accepting.build(),
            state,
        }
    }
}

impl<T: Message> Default for MessageBusBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish/subscribe over event types.
pub struct MessageBus<T: Message> {
    accepting_channel: Channel<T>,
    state: Arc<BusState<T>>,
}

impl<T: Message> MessageBus<T> {
    /// Start building a bus.
    pub fn builder() -> MessageBusBuilder<T> {
        MessageBusBuilder::new()
    }

    /// A synchronous bus with default policies.
    pub fn synchronous() -> Self {
        MessageBusBuilder::new().build()
    }

    /// Publish a payload under an event type.
    ///
    /// For an asynchronous bus, `Ok` means accepted into the queue, not
    /// yet delivered.
    pub fn send(&self, event_type: EventType, payload: T) -> Result<MessageId, PipeError> {
        self.send_context(ProcessingContext::for_event(event_type, payload))
    }

    /// Publish a payload under an event type, correlated to an earlier
    /// message, e.g. when answering a request.
    pub fn send_with_correlation(
        &self,
        event_type: EventType,
        payload: T,
        correlation_id: CorrelationId,
    ) -> Result<MessageId, PipeError> {
        self.send_context(
            ProcessingContext::for_event(event_type, payload).with_correlation_id(correlation_id),
        )
    }

    /// Publish a pre-built context, e.g. a reply carrying a correlation
    /// id. The context must carry an event type to be routable.
    pub fn send_context(&self, context: ProcessingContext<T>) -> Result<MessageId, PipeError> {
        let message_id = context.message_id();
        self.accepting_channel.accept(context)?;
        Ok(message_id)
    }

    /// Register a payload subscriber for an event type.
    ///
    /// The delivery channel is created on demand; subscribing never
    /// fails.
    pub fn subscribe(
        &self,
        event_type: EventType,
        subscriber: impl Subscriber<T>,
    ) -> SubscriptionId {
        let delivery = self.state.delivery_channel(&event_type);
        let id = delivery.subscription.subscribe(Arc::new(subscriber));
        self.state.subscriptions.write().insert(id, event_type);
        id
    }

    /// Register a subscriber receiving whole contexts for an event type.
    pub fn subscribe_raw(
        &self,
        event_type: EventType,
        subscriber: impl Subscriber<ProcessingContext<T>>,
    ) -> SubscriptionId {
        let delivery = self.state.delivery_channel(&event_type);
        let id = delivery.subscription.subscribe_raw(Arc::new(subscriber));
        self.state.subscriptions.write().insert(id, event_type);
        id
    }

    /// Detach a subscriber; returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(event_type) = self.state.subscriptions.write().remove(&id) else {
            return false;
        };
        let Some(delivery) = self.state.channels.read().get(&event_type).cloned() else {
            return false;
        };
        delivery.subscription.unsubscribe(id)
    }

    /// Append a bus-wide filter to the given stage.
    ///
    /// Bus-wide filters run on the accepting channel, before routing.
    pub fn add_filter(&self, stage: FilterStage, filter: Arc<ChannelFilter<T>>) {
        self.accepting_channel.add_filter(stage, filter);
    }

    /// Insert a bus-wide filter at a position within the given stage.
    pub fn add_filter_at(
        &self,
        stage: FilterStage,
        filter: Arc<ChannelFilter<T>>,
        position: usize,
    ) -> Result<(), omnibus_core::ValidationError> {
        self.accepting_channel.add_filter_at(stage, filter, position)
    }

    /// Remove a bus-wide filter by handle identity.
    pub fn remove_filter(&self, stage: FilterStage, filter: &Arc<ChannelFilter<T>>) -> bool {
        self.accepting_channel.remove_filter(stage, filter)
    }

    /// The current bus-wide filters of the given stage, in order.
    pub fn filters(&self, stage: FilterStage) -> Vec<Arc<ChannelFilter<T>>> {
        self.accepting_channel.filters(stage)
    }

    /// Observe errors for one event type; returns the handle for
    /// unregistering.
    pub fn register_exception_listener(
        &self,
        event_type: EventType,
        listener: impl ExceptionListener<T> + 'static,
    ) -> ExceptionListenerId {
        self.state.listeners.register(event_type, Arc::new(listener))
    }

    /// Detach an exception listener; returns whether it was registered.
    pub fn unregister_exception_listener(&self, id: ExceptionListenerId) -> bool {
        self.state.listeners.unregister(id)
    }

    /// Aggregated counters and routing configuration at one point in
    /// time.
    pub fn status_information(&self) -> MessageBusStatusInformation<T> {
        let accepting = self.accepting_channel.statistics();
        let channels = self.state.channels.read().clone();
        let mut statistics = MessageBusStatistics {
            timestamp: SystemTime::now(),
            accepted: accepting.accepted,
            queued: accepting.queued,
            blocked: accepting.blocked,
            forgotten: accepting.forgotten,
            replaced: accepting.replaced,
            successful: 0,
            failed: accepting.failed,
        };
        let mut channel_handles = HashMap::new();
        let mut subscribers = HashMap::new();
        for (event_type, delivery) in channels {
            let channel_statistics = delivery.channel.statistics();
            statistics.blocked += channel_statistics.blocked;
            statistics.forgotten += channel_statistics.forgotten;
            statistics.replaced += channel_statistics.replaced;
            statistics.successful += channel_statistics.successful;
            statistics.failed += channel_statistics.failed;
            subscribers.insert(event_type.clone(), delivery.subscription.subscriber_ids());
            channel_handles.insert(event_type, delivery.channel);
        }
        MessageBusStatusInformation {
            statistics,
            channels: channel_handles,
            subscribers,
        }
    }

    /// Aggregated counter snapshot.
    pub fn statistics(&self) -> MessageBusStatistics {
        self.status_information().statistics
    }

    /// Stop accepting messages; drain or discard queued ones.
    ///
    /// Cascades to every delivery channel. Messages still draining from
    /// the accepting queue are routed past the delivery channels' closed
    /// state, so a finishing close loses nothing already accepted.
    pub fn close(&self, finish_remaining_tasks: bool) {
        self.accepting_channel.close(finish_remaining_tasks);
        let channels: Vec<_> = self
            .state
            .channels
            .read()
            .values()
            .map(|delivery| delivery.channel.clone())
            .collect();
        for channel in channels {
            channel.close(finish_remaining_tasks);
        }
    }

    /// Whether `close` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.accepting_channel.is_shutdown()
    }

    /// Block until the bus is closed and every channel is drained, or
    /// the timeout elapses. One deadline covers all channels; returns
    /// `false` on timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if !self.accepting_channel.await_termination(timeout) {
            return false;
        }
        // Delivery channels created while the backlog drained were never
        // reached by the close cascade; close them now that routing has
        // stopped.
        let channels: Vec<_> = self
            .state
            .channels
            .read()
            .values()
            .map(|delivery| delivery.channel.clone())
            .collect();
        for channel in channels {
            if !channel.is_shutdown() {
                channel.close(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !channel.await_termination(remaining) {
                return false;
            }
        }
        true
    }
}
