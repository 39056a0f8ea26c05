//! # Filter Contract
//!
//! Filters are the participants of a channel's pre/process/post stages.
//! A filter receives the in-flight message and must resolve it to exactly
//! one [`FilterOutcome`]:
//!
//! - **Pass**: hand the (possibly mutated) message on to the next filter
//! - **Replace**: hand a successor message on instead (counted separately)
//! - **Block**: stop delivery, counted as blocked
//! - **Forget**: stop delivery, counted as forgotten
//!
//! Block and forget behave identically for delivery; they exist as two
//! variants purely so observers can tell an intentional veto from a
//! silent drop.
//!
//! Returning the resolution as a value makes the exactly-once contract a
//! property of the type system: a filter cannot resolve a message twice
//! or not at all.

use crate::error::BoxError;

/// The three ordered filter stages of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterStage {
    /// Runs first, before any processing.
    Pre,
    /// Runs between the pre and post stages.
    Process,
    /// Runs last, immediately before the channel's action is resolved.
    Post,
}

/// The resolution a filter chose for one message.
#[derive(Debug)]
pub enum FilterOutcome<M> {
    /// Continue with the (possibly mutated) message.
    Pass,
    /// Continue with a replacement message instead.
    Replace(M),
    /// Stop delivery; the message is counted as blocked.
    Block,
    /// Stop delivery; the message is counted as forgotten.
    Forget,
}

/// A stage participant that may pass, replace, block or forget a message.
///
/// Filters are shared between the registering thread and every delivering
/// thread, hence the `Send + Sync` bound. A filter returning an error
/// aborts delivery for that single message and is reported to the
/// channel's exception policy; other in-flight messages are unaffected.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a `Filter` for `{M}`",
    label = "missing `Filter` implementation",
    note = "Filters must resolve every message to exactly one `FilterOutcome`."
)]
pub trait Filter<M>: Send + Sync + 'static {
    /// Resolve one in-flight message to an outcome.
    fn apply(&self, message: &mut M) -> Result<FilterOutcome<M>, BoxError>;
}

impl<M, F> Filter<M> for F
where
    F: Fn(&mut M) -> Result<FilterOutcome<M>, BoxError> + Send + Sync + 'static,
{
    fn apply(&self, message: &mut M) -> Result<FilterOutcome<M>, BoxError> {
        self(message)
    }
}
