//! Message trait for bus payloads.

/// A marker trait for values that can travel through the bus.
///
/// Payloads are opaque to the core: anything thread-safe and `'static`
/// qualifies, so the trait is blanket-implemented.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a valid Message",
    label = "must be `Send + Sync + 'static`",
    note = "All payloads travelling through the bus must be thread-safe and static."
)]
pub trait Message: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Message for T {}
