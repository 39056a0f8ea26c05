//! # Channel
//!
//! A message [`Pipe`] wrapped in three filter stages and a terminal
//! action. Contexts entering a channel pass its pre, process and post
//! filters in order; whichever filter stops the message decides its
//! fate, and a message passing all stages is handed to the action
//! resolved for this visit (a filter override or the channel's default).
//!
//! Internally a channel is four pipes wired back to back: the accepting
//! pipe (the only one that can be asynchronous, and the only one with
//! shutdown state), one per filter stage, and a final pipe resolving
//! and dispatching the action. Closing a channel closes the accepting
//! pipe; everything behind it is synchronous and drains naturally.

pub mod action;
mod action_handling;
mod events;
mod statistics;

pub use events::{ChannelEventListener, TracingEventListener};
pub use statistics::ChannelStatistics;

use crate::context::{ContextPipe, ProcessingContext};
use crate::error::PipeError;
use crate::exceptions::{ExceptionHandler, LoggingExceptionHandler};
use crate::pipe::{AsynchronousConfiguration, Pipe};
use action::{Action, Subscription};
use arc_swap::ArcSwap;
use omnibus_core::{
    ChannelId, Filter, FilterStage, Message, MessageId, Subscriber, SubscriptionId,
    ValidationError,
};
use statistics::ChannelStatisticsCollector;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// A filter over a channel's processing contexts.
pub type ChannelFilter<T> = dyn Filter<ProcessingContext<T>>;

/// An ordered, concurrently mutable filter list for one stage.
struct FilterList<T: Message> {
    filters: ArcSwap<Vec<Arc<ChannelFilter<T>>>>,
}

impl<T: Message> FilterList<T> {
    fn new() -> Self {
        Self {
            filters: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn add(&self, filter: Arc<ChannelFilter<T>>) {
        self.filters.rcu(|current| {
            let mut next = (**current).clone();
            next.push(filter.clone());
            next
        });
    }

    fn add_at(&self, filter: Arc<ChannelFilter<T>>, position: usize) -> Result<(), ValidationError> {
        let mut out_of_bounds = None;
        self.filters.rcu(|current| {
            if position > current.len() {
                out_of_bounds = Some(current.len());
                return (**current).clone();
            }
            out_of_bounds = None;
            let mut next = (**current).clone();
            next.insert(position, filter.clone());
            next
        });
        match out_of_bounds {
            Some(len) => Err(ValidationError::FilterPositionOutOfBounds { position, len }),
            None => Ok(()),
        }
    }

    /// Removal matches by handle identity, not by equality.
    fn remove(&self, filter: &Arc<ChannelFilter<T>>) -> bool {
        let mut removed = false;
        self.filters.rcu(|current| {
            removed = current.iter().any(|f| Arc::ptr_eq(f, filter));
            current
                .iter()
                .filter(|f| !Arc::ptr_eq(f, filter))
                .cloned()
                .collect::<Vec<_>>()
        });
        removed
    }

    fn snapshot(&self) -> Arc<Vec<Arc<ChannelFilter<T>>>> {
        self.filters.load_full()
    }
}

/// State shared by a channel's pipes and handed to the dispatcher.
pub(crate) struct ChannelCore<T: Message> {
    pub(crate) id: ChannelId,
    pre_filters: FilterList<T>,
    process_filters: FilterList<T>,
    post_filters: FilterList<T>,
    pub(crate) default_action: Action<T>,
    pub(crate) statistics: ChannelStatisticsCollector,
    pub(crate) event_listener: Arc<dyn ChannelEventListener<T>>,
    pub(crate) exception_handler: Arc<dyn ExceptionHandler<T>>,
    /// The pipe a completed call resumes into; set once at build time.
    pub(crate) after_post: OnceLock<Arc<ContextPipe<T>>>,
}

impl<T: Message> ChannelCore<T> {
    fn filter_list(&self, stage: FilterStage) -> &FilterList<T> {
        match stage {
            FilterStage::Pre => &self.pre_filters,
            FilterStage::Process => &self.process_filters,
            FilterStage::Post => &self.post_filters,
        }
    }

    pub(crate) fn stage_filters(&self, stage: FilterStage) -> Arc<Vec<Arc<ChannelFilter<T>>>> {
        self.filter_list(stage).snapshot()
    }
}

/// Configures and builds a [`Channel`].
pub struct ChannelBuilder<T: Message> {
    default_action: Action<T>,
    asynchronous: Option<AsynchronousConfiguration>,
    event_listener: Option<Arc<dyn ChannelEventListener<T>>>,
    exception_handler: Option<Arc<dyn ExceptionHandler<T>>>,
}

impl<T: Message> ChannelBuilder<T> {
    /// Start building a channel with the given default action.
    pub fn new(default_action: Action<T>) -> Self {
        Self {
            default_action,
            asynchronous: None,
            event_listener: None,
            exception_handler: None,
        }
    }

    /// Accept messages through a worker pool instead of inline.
    pub fn asynchronous(mut self, configuration: AsynchronousConfiguration) -> Self {
        self.asynchronous = Some(configuration);
        self
    }

    /// Observe filter verdicts with the given listener.
    pub fn event_listener(mut self, listener: Arc<dyn ChannelEventListener<T>>) -> Self {
        self.event_listener = Some(listener);
        self
    }

    /// React to filter and subscriber errors with the given handler.
    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler<T>>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Wire the pipes and start workers if configured asynchronous.
    pub fn build(self) -> Channel<T> {
        let core = Arc::new(ChannelCore {
            id: ChannelId::fresh(),
            pre_filters: FilterList::new(),
            process_filters: FilterList::new(),
            post_filters: FilterList::new(),
            default_action: self.default_action,
            statistics: ChannelStatisticsCollector::default(),
            event_listener: self
                .event_listener
                .unwrap_or_else(|| Arc::new(TracingEventListener)),
            exception_handler: self
                .exception_handler
                .unwrap_or_else(|| Arc::new(LoggingExceptionHandler)),
            after_post: OnceLock::new(),
        });

        let after_post = Arc::new(Pipe::synchronous({
            let core = core.clone();
            move |context| {
                action_handling::dispatch(&core, context);
                Ok(())
            }
        }));
        // Recorded so calls dispatched from this channel know where a
        // Return re-enters it.
        let _ = core.after_post.set(after_post.clone());

        let post = Arc::new(Pipe::synchronous(action_handling::stage_delivery(
            core.clone(),
            FilterStage::Post,
            after_post,
        )));
        let process = Arc::new(Pipe::synchronous(action_handling::stage_delivery(
            core.clone(),
            FilterStage::Process,
            post,
        )));
        let accepting_delivery =
            action_handling::stage_delivery(core.clone(), FilterStage::Pre, process);
        let accepting_pipe = Arc::new(match self.asynchronous {
            None => Pipe::synchronous(accepting_delivery),
            Some(configuration) => Pipe::asynchronous(configuration, accepting_delivery),
        });

        Channel {
            core,
            accepting_pipe,
        }
    }
}

/// A filtered, action-terminated message conduit.
pub struct Channel<T: Message> {
    core: Arc<ChannelCore<T>>,
    accepting_pipe: Arc<ContextPipe<T>>,
}

impl<T: Message> Channel<T> {
    /// Start building a channel with the given default action.
    pub fn builder(default_action: Action<T>) -> ChannelBuilder<T> {
        ChannelBuilder::new(default_action)
    }

    /// A synchronous channel with the given default action.
    pub fn synchronous(default_action: Action<T>) -> Self {
        ChannelBuilder::new(default_action).build()
    }

    /// The process-local identity of this channel.
    pub fn id(&self) -> ChannelId {
        self.core.id
    }

    /// Wrap a payload in a fresh context and accept it.
    pub fn send(&self, payload: T) -> Result<MessageId, PipeError> {
        let context = ProcessingContext::new(payload);
        let message_id = context.message_id();
        self.accept(context)?;
        Ok(message_id)
    }

    /// Accept a context for processing.
    ///
    /// Appends this channel's frame to the context's history and hands
    /// it to the accepting pipe. For an asynchronous channel, `Ok`
    /// means enqueued, not yet delivered.
    pub fn accept(&self, mut context: ProcessingContext<T>) -> Result<(), PipeError> {
        context.enter_channel(self.core.id);
        self.accepting_pipe.send(context)
    }

    /// Accept a context even when the channel is already closed.
    ///
    /// A bus closes its delivery channels together with the shared
    /// accepting channel; messages still draining from the accepting
    /// queue must nevertheless reach their subscribers.
    pub(crate) fn accept_routed(&self, mut context: ProcessingContext<T>) -> Result<(), PipeError> {
        context.enter_channel(self.core.id);
        self.accepting_pipe.send_bypassing_shutdown(context)
    }

    /// Append a filter to the given stage.
    pub fn add_filter(&self, stage: FilterStage, filter: Arc<ChannelFilter<T>>) {
        self.core.filter_list(stage).add(filter);
    }

    /// Insert a filter at a position within the given stage.
    ///
    /// Positions past the end of the list are rejected, not clamped.
    pub fn add_filter_at(
        &self,
        stage: FilterStage,
        filter: Arc<ChannelFilter<T>>,
        position: usize,
    ) -> Result<(), ValidationError> {
        self.core.filter_list(stage).add_at(filter, position)
    }

    /// Remove a filter from the given stage by handle identity.
    pub fn remove_filter(&self, stage: FilterStage, filter: &Arc<ChannelFilter<T>>) -> bool {
        self.core.filter_list(stage).remove(filter)
    }

    /// The current filters of the given stage, in order.
    pub fn filters(&self, stage: FilterStage) -> Vec<Arc<ChannelFilter<T>>> {
        self.core.filter_list(stage).snapshot().to_vec()
    }

    /// The channel's default action.
    pub fn default_action(&self) -> &Action<T> {
        &self.core.default_action
    }

    /// The subscriber registry, if the default action is a subscription.
    pub fn subscription(&self) -> Option<&Subscription<T>> {
        match &self.core.default_action {
            Action::Subscription(subscription) => Some(subscription),
            _ => None,
        }
    }

    /// Register a payload subscriber on the default subscription.
    pub fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber<T>>,
    ) -> Result<SubscriptionId, ValidationError> {
        self.subscription()
            .map(|s| s.subscribe(subscriber))
            .ok_or(ValidationError::NoSubscriptionAction)
    }

    /// Register a subscriber receiving whole contexts.
    pub fn subscribe_raw(
        &self,
        subscriber: Arc<dyn Subscriber<ProcessingContext<T>>>,
    ) -> Result<SubscriptionId, ValidationError> {
        self.subscription()
            .map(|s| s.subscribe_raw(subscriber))
            .ok_or(ValidationError::NoSubscriptionAction)
    }

    /// Detach a subscriber; returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscription().is_some_and(|s| s.unsubscribe(id))
    }

    /// Point-in-time snapshot of this channel's counters.
    pub fn statistics(&self) -> ChannelStatistics {
        self.core
            .statistics
            .snapshot(&self.accepting_pipe.statistics())
    }

    /// Counters plus the current filter and subscriber configuration.
    pub fn status_information(&self) -> ChannelStatusInformation<T> {
        ChannelStatusInformation {
            statistics: self.statistics(),
            pre_filters: self.filters(FilterStage::Pre),
            process_filters: self.filters(FilterStage::Process),
            post_filters: self.filters(FilterStage::Post),
            subscribers: self
                .subscription()
                .map(Subscription::subscriber_ids)
                .unwrap_or_default(),
        }
    }

    /// Whether this channel accepts through a worker pool.
    pub fn is_asynchronous(&self) -> bool {
        self.accepting_pipe.is_asynchronous()
    }

    /// Stop accepting messages; drain or discard queued ones.
    pub fn close(&self, finish_remaining_tasks: bool) {
        self.accepting_pipe.close(finish_remaining_tasks);
    }

    /// Whether `close` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.accepting_pipe.is_shutdown()
    }

    /// Block until the channel is closed and drained, or the timeout
    /// elapses. Returns `false` on timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.accepting_pipe.await_termination(timeout)
    }
}

/// A channel's counters and configuration at one point in time.
pub struct ChannelStatusInformation<T: Message> {
    /// Counter snapshot.
    pub statistics: ChannelStatistics,
    /// Filters of the pre stage, in order.
    pub pre_filters: Vec<Arc<ChannelFilter<T>>>,
    /// Filters of the process stage, in order.
    pub process_filters: Vec<Arc<ChannelFilter<T>>>,
    /// Filters of the post stage, in order.
    pub post_filters: Vec<Arc<ChannelFilter<T>>>,
    /// Handles of the currently registered subscribers.
    pub subscribers: Vec<SubscriptionId>,
}
