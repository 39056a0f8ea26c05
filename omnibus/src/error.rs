//! Error types for the Omnibus engine.
//!
//! Structured errors raised by the engine itself:
//!
//! - [`PipeError`] - send-time failures of a pipe or channel
//! - [`ActionHandlingError`] - misconfigured control-flow actions
//!
//! Dynamic failures from user-supplied filters and subscribers travel as
//! [`BoxError`] and are routed to the configured exception policy instead
//! of being raised at the call site.

use omnibus_core::BoxError;
use thiserror::Error;

/// Failures raised synchronously from `send` on a pipe or channel.
///
/// A failed send never accepts the message and never changes statistics.
#[derive(Error, Debug)]
pub enum PipeError {
    /// The bounded queue (plus in-flight slots) is at capacity.
    ///
    /// Asynchronous pipes never block the sender; a send at capacity
    /// fails immediately instead.
    #[error("queue is at capacity; message rejected")]
    QueueFull,

    /// The pipe has been closed; no further messages are accepted.
    #[error("already closed; message rejected")]
    Closed,

    /// A synchronous delivery function failed.
    ///
    /// Only synchronous pipes surface this to the sender; asynchronous
    /// pipes report delivery failures to their error sink instead.
    #[error("delivery failed")]
    Delivery(#[source] BoxError),
}

/// Misuse of the channel control-flow actions, reported to the exception
/// policy as a delivery error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionHandlingError {
    /// `Call` was resolved from a channel's default action.
    ///
    /// Calls must be set per-frame by a filter; a channel whose every
    /// message performs the same call would re-enter the call after each
    /// return and never terminate.
    #[error("call is not allowed as a channel's default action")]
    CallNotAllowedAsDefaultAction,

    /// `Return` was dispatched but no un-returned `Call` frame exists in
    /// the context's history.
    #[error("return dispatched without a matching call")]
    ReturnWithoutCall,
}
