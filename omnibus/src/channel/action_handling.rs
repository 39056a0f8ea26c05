//! Stage traversal and action dispatch.
//!
//! Each filter stage is the delivery function of one internal pipe: it
//! snapshots the stage's filter list, applies the filters in order and
//! hands surviving contexts to the next pipe. The final pipe resolves
//! the action for the current frame (filter override first, channel
//! default otherwise) and dispatches it.

use super::action::{Action, Subscription};
use super::ChannelCore;
use crate::context::{ContextPipe, ProcessingContext};
use crate::error::ActionHandlingError;
use omnibus_core::{AcceptingBehavior, BoxError, FilterOutcome, FilterStage, Message};
use std::sync::Arc;

/// The delivery function running one filter stage.
pub(super) fn stage_delivery<T: Message>(
    core: Arc<ChannelCore<T>>,
    stage: FilterStage,
    next: Arc<ContextPipe<T>>,
) -> impl Fn(ProcessingContext<T>) -> Result<(), BoxError> + Send + Sync + 'static {
    move |mut context| {
        let filters = core.stage_filters(stage);
        for filter in filters.iter() {
            match filter.apply(&mut context) {
                Ok(FilterOutcome::Pass) => {}
                Ok(FilterOutcome::Replace(replacement)) => {
                    // Identifiers and history survive a replacement; only
                    // the payloads are taken from the successor context.
                    context.adopt_replacement(replacement);
                    core.statistics.message_replaced();
                    core.event_listener.message_replaced(&context);
                }
                Ok(FilterOutcome::Block) => {
                    core.statistics.message_blocked();
                    core.event_listener.message_blocked(&context);
                    return Ok(());
                }
                Ok(FilterOutcome::Forget) => {
                    core.statistics.message_forgotten();
                    core.event_listener.message_forgotten(&context);
                    return Ok(());
                }
                Err(error) => {
                    core.statistics.message_failed();
                    core.exception_handler.on_filter_error(&context, error);
                    return Ok(());
                }
            }
        }
        next.send(context)?;
        Ok(())
    }
}

/// Resolve the action for the current frame and dispatch it.
pub(super) fn dispatch<T: Message>(core: &Arc<ChannelCore<T>>, mut context: ProcessingContext<T>) {
    let action = if context.current_frame_call_returned() {
        // A completed call resumes here; continue with the default.
        match resolved_default(core, &context) {
            Some(action) => action,
            None => return,
        }
    } else {
        match context.current_frame_action() {
            Some(action) => action.clone(),
            None => match resolved_default(core, &context) {
                Some(action) => {
                    context.set_current_frame_action(action.clone());
                    action
                }
                None => return,
            },
        }
    };

    match action {
        Action::Consume(consume) => {
            consume.invoke(context);
            core.statistics.message_delivered();
        }
        Action::Jump(target) => match target.accept(context) {
            Ok(()) => core.statistics.message_delivered(),
            Err(error) => {
                core.statistics.message_failed();
                tracing::error!(%error, "jump target rejected the message");
            }
        },
        Action::Call(call) => {
            let Some(after_post) = core.after_post.get() else {
                core.statistics.message_failed();
                return;
            };
            context.set_current_frame_resume(after_post.clone());
            if let Err(error) = call.target().accept(context) {
                core.statistics.message_failed();
                tracing::error!(%error, "call target rejected the message");
            }
        }
        Action::Return => dispatch_return(core, context),
        Action::Subscription(subscription) => {
            deliver_to_subscribers(core, &subscription, context);
        }
    }
}

/// The channel's default action, prepared for this frame.
///
/// `Call` is rejected as a default: calls must be set per-frame by a
/// filter, otherwise every resumption would re-enter the same call.
fn resolved_default<T: Message>(
    core: &Arc<ChannelCore<T>>,
    context: &ProcessingContext<T>,
) -> Option<Action<T>> {
    let action = core.default_action.clone();
    if matches!(action, Action::Call(_)) {
        core.statistics.message_failed();
        core.exception_handler.on_delivery_error(
            context,
            Box::new(ActionHandlingError::CallNotAllowedAsDefaultAction),
        );
        return None;
    }
    Some(action)
}

/// Resume the most recent outstanding call in the context's history.
fn dispatch_return<T: Message>(core: &Arc<ChannelCore<T>>, mut context: ProcessingContext<T>) {
    let Some(index) = context.find_unreturned_call() else {
        core.statistics.message_failed();
        core.exception_handler
            .on_delivery_error(&context, Box::new(ActionHandlingError::ReturnWithoutCall));
        return;
    };
    context.mark_call_returned(index);
    let Some(resume) = context.resume_at(index) else {
        core.statistics.message_failed();
        tracing::error!("call frame carries no resume pipe");
        return;
    };
    match resume.send(context) {
        Ok(()) => core.statistics.message_delivered(),
        Err(error) => {
            core.statistics.message_failed();
            tracing::error!(%error, "resuming the calling channel failed");
        }
    }
}

/// Fan the context out to the subscription's current subscribers.
///
/// An erroring subscriber is reported once; whether the remaining
/// subscribers still receive the message is the exception handler's
/// abort decision. Subscribers answering
/// [`AcceptingBehavior::Unsubscribe`] are detached after the fan-out.
fn deliver_to_subscribers<T: Message>(
    core: &Arc<ChannelCore<T>>,
    subscription: &Subscription<T>,
    context: ProcessingContext<T>,
) {
    let entries = subscription.snapshot();
    let mut detached = Vec::new();
    let mut failed = false;
    for entry in entries.iter() {
        match Subscription::deliver(entry, &context) {
            Ok(AcceptingBehavior::Remain) => {}
            Ok(AcceptingBehavior::Unsubscribe) => detached.push(entry.id),
            Err(error) => {
                failed = true;
                let abort = core.exception_handler.should_abort_delivery(&context, &error);
                core.exception_handler.on_delivery_error(&context, error);
                if abort {
                    break;
                }
            }
        }
    }
    for id in detached {
        subscription.unsubscribe(id);
    }
    if failed {
        core.statistics.message_failed();
    } else {
        core.statistics.message_delivered();
    }
}
