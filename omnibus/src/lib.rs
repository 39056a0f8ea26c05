//! # omnibus - In-Process Message Bus
//!
//! `omnibus` is an in-process publish/subscribe and pipeline-processing
//! engine built from three layers:
//!
//! - [`Pipe`] - a message queue with pluggable delivery: inline on the
//!   sender's thread, or through a bounded queue and a worker pool
//! - [`Channel`] - a pipe wrapped in three ordered filter stages and a
//!   terminal [`Action`]: consume, jump, call/return or a subscription
//! - [`MessageBus`] - channels composed into publish/subscribe: one
//!   accepting channel routing by [`EventType`] into lazily created
//!   per-event-type delivery channels
//!
//! [`MessageFunction`] adds request/reply with correlation ids on top
//! of a bus.
//!
//! ## Quick Start
//!
//! ```rust
//! use omnibus::{MessageBus, EventType};
//!
//! let bus = MessageBus::synchronous();
//! let orders = EventType::of("order.placed");
//! bus.subscribe(orders.clone(), |order: &String| {
//!     println!("received {order}");
//!     Ok(omnibus::AcceptingBehavior::Remain)
//! });
//! bus.send(orders, String::from("order-17"))?;
//! # Ok::<(), omnibus::PipeError>(())
//! ```
//!
//! ## Concurrency Model
//!
//! Asynchronous pipes never block senders: a send at capacity fails
//! with [`PipeError::QueueFull`]. Filter and subscriber registries are
//! copy-on-write, so configuration changes never stall deliveries
//! already under way. Errors from user code are routed to an
//! [`ExceptionHandler`] and never tear down workers.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub mod bus;
pub mod channel;
pub mod context;
mod error;
pub mod exceptions;
pub mod function;
pub mod pipe;

pub use bus::{ExceptionListener, MessageBus, MessageBusBuilder, MessageBusStatistics,
    MessageBusStatusInformation};
pub use channel::action::{Action, ActionKind, Call, Subscription};
pub use channel::{
    Channel, ChannelBuilder, ChannelEventListener, ChannelFilter, ChannelStatistics,
    ChannelStatusInformation, TracingEventListener,
};
pub use context::{ChannelProcessingFrame, ProcessingContext};
pub use error::{ActionHandlingError, PipeError};
pub use exceptions::{ExceptionHandler, LoggingExceptionHandler};
pub use function::{MessageFunction, RequestError, Response, ResponseFuture};
pub use pipe::{AsynchronousConfiguration, Pipe, PipeStatistics};

pub use omnibus_core::{
    AcceptingBehavior, BoxError, ChannelId, CorrelationId, EventType, ExceptionListenerId, Filter,
    FilterOutcome, FilterStage, Message, MessageId, Subscriber, SubscriptionId, ValidationError,
};
