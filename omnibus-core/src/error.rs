//! Error types shared by the Omnibus contracts.
//!
//! Dynamic failures from user-supplied filters and subscribers travel as
//! [`BoxError`]; structured failures raised by the core itself use
//! `thiserror` enums ([`ValidationError`] here, the pipe/channel errors in
//! the engine crate).

use thiserror::Error;

/// A boxed error type for dynamic error handling.
///
/// Filters and subscribers report failures through this type; the engine
/// routes them to the configured exception policy.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised synchronously at a call site for invalid arguments.
///
/// Nothing is accepted when a validation error is returned.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// A filter insertion position was outside the current list bounds.
    ///
    /// Out-of-range positions are rejected, never clamped.
    #[error("filter position {position} out of bounds for list of length {len}")]
    FilterPositionOutOfBounds {
        /// The rejected insertion position.
        position: usize,
        /// The length of the filter list at the time of the call.
        len: usize,
    },

    /// A subscribe call was made on a channel whose final action does not
    /// maintain a subscriber set.
    #[error("channel's final action is not a subscription")]
    NoSubscriptionAction,
}
