//! # omnibus-core
//!
//! Core contracts for the Omnibus in-process message bus.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! filters, subscribers and integrations that don't need the full
//! `omnibus` engine.
//!
//! # Contracts
//!
//! ## Identifiers ([`identification`])
//!
//! Value types routing and correlating messages: [`EventType`],
//! [`MessageId`], [`CorrelationId`], [`SubscriptionId`], [`ChannelId`].
//! All compare by value and are cheap to clone.
//!
//! ## Payloads ([`Message`])
//!
//! Payloads are opaque to the bus; any `Send + Sync + 'static` value
//! qualifies via a blanket impl.
//!
//! ## Filters ([`Filter`])
//!
//! Stage participants resolving each message to exactly one
//! [`FilterOutcome`]: pass, replace, block or forget. Ownership-passing
//! makes the exactly-once resolution a property of the type system.
//!
//! ## Subscribers ([`Subscriber`])
//!
//! Terminal consumers answering each delivery with an
//! [`AcceptingBehavior`]: remain subscribed, or auto-detach after this
//! message.
//!
//! # Error Types
//!
//! - [`BoxError`] - dynamic failures from user-supplied filters/subscribers
//! - [`ValidationError`] - invalid arguments rejected at the call site

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod error;
mod filtering;
pub mod identification;
mod message;
mod subscribing;

pub use error::{BoxError, ValidationError};
pub use filtering::{Filter, FilterOutcome, FilterStage};
pub use identification::{
    ChannelId, CorrelationId, EventType, ExceptionListenerId, MessageId, SubscriptionId,
};
pub use message::Message;
pub use subscribing::{AcceptingBehavior, Subscriber};
