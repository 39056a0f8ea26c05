//! # Processing Context
//!
//! The envelope carrying a payload through the bus: identifiers, an
//! optional error payload, and the context's traversal history.
//!
//! Every time a context enters a channel's accept step, exactly one new
//! [`ChannelProcessingFrame`] is appended to its history. The history is
//! an append-only sequence owned exclusively by the context: frames
//! never move between contexts and are never shared, so concurrent
//! contexts cannot interfere with each other's call/return bookkeeping.
//!
//! Identifiers are fixed at construction; only the payload and the error
//! payload may change while the context traverses filters.

use crate::channel::action::Action;
use crate::pipe::Pipe;
use omnibus_core::{ChannelId, CorrelationId, EventType, Message, MessageId};
use std::fmt;
use std::sync::Arc;

/// The pipe type carrying contexts between channel stages.
pub(crate) type ContextPipe<T> = Pipe<ProcessingContext<T>>;

/// One record of a context's visit to one channel.
///
/// Records which channel was entered and the action ultimately selected
/// for that visit (unset until resolved after the post stage).
pub struct ChannelProcessingFrame<T: Message> {
    channel_id: ChannelId,
    action: Option<Action<T>>,
    /// Where a `Return` re-enters the calling channel; set when a call
    /// is dispatched from this frame.
    resume: Option<Arc<ContextPipe<T>>>,
    /// Whether a `Return` has consumed this frame's call. Lives on the
    /// frame, not the action, so an `Action::Call` value cloned onto
    /// many contexts keeps its call state scoped per visit.
    returned: bool,
}

impl<T: Message> ChannelProcessingFrame<T> {
    fn entering(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            action: None,
            resume: None,
            returned: false,
        }
    }

    /// The channel this frame belongs to.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// The action selected for this visit, once resolved.
    pub fn action(&self) -> Option<&Action<T>> {
        self.action.as_ref()
    }
}

impl<T: Message> fmt::Debug for ChannelProcessingFrame<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelProcessingFrame")
            .field("channel_id", &self.channel_id)
            .field("action", &self.action.as_ref().map(Action::kind))
            .finish()
    }
}

/// The envelope carrying one payload through channels and the bus.
pub struct ProcessingContext<T: Message> {
    event_type: Option<EventType>,
    message_id: MessageId,
    correlation_id: Option<CorrelationId>,
    payload: T,
    error_payload: Option<T>,
    frames: Vec<ChannelProcessingFrame<T>>,
    current_frame: Option<usize>,
}

impl<T: Message> ProcessingContext<T> {
    /// Wrap a payload for direct delivery to a channel.
    pub fn new(payload: T) -> Self {
        Self {
            event_type: None,
            message_id: MessageId::fresh(),
            correlation_id: None,
            payload,
            error_payload: None,
            frames: Vec::new(),
            current_frame: None,
        }
    }

    /// Wrap a payload for delivery through the bus under an event type.
    pub fn for_event(event_type: EventType, payload: T) -> Self {
        let mut context = Self::new(payload);
        context.event_type = Some(event_type);
        context
    }

    /// Attach a correlation id, e.g. when answering a request.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// The event type this context is routed by, if it entered via a bus.
    pub fn event_type(&self) -> Option<&EventType> {
        self.event_type.as_ref()
    }

    /// The unique id of the send that created this context.
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// The correlation id, if one was attached.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// The payload being delivered.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mutable access to the payload.
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Swap the payload, returning the previous one.
    pub fn replace_payload(&mut self, payload: T) -> T {
        std::mem::replace(&mut self.payload, payload)
    }

    /// The error payload, if a responder attached one.
    pub fn error_payload(&self) -> Option<&T> {
        self.error_payload.as_ref()
    }

    /// Attach or clear the error payload.
    pub fn set_error_payload(&mut self, error_payload: Option<T>) {
        self.error_payload = error_payload;
    }

    /// Consume the context, yielding its payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Override the action for the current channel visit.
    ///
    /// The override wins over the channel's default action when the
    /// action is resolved after the post stage. It applies to the
    /// current frame only; outside a channel this has no effect.
    pub fn set_action(&mut self, action: Action<T>) {
        if let Some(index) = self.current_frame {
            self.frames[index].action = Some(action);
        }
    }

    /// The traversal history, oldest frame first.
    pub fn frames(&self) -> &[ChannelProcessingFrame<T>] {
        &self.frames
    }

    /// Append the frame recording entry into the given channel.
    pub(crate) fn enter_channel(&mut self, channel_id: ChannelId) {
        self.frames.push(ChannelProcessingFrame::entering(channel_id));
        self.current_frame = Some(self.frames.len() - 1);
    }

    /// Take payload and error payload from a replacement context,
    /// keeping this context's identifiers and history.
    pub(crate) fn adopt_replacement(&mut self, replacement: ProcessingContext<T>) {
        self.payload = replacement.payload;
        self.error_payload = replacement.error_payload;
    }

    pub(crate) fn current_frame_action(&self) -> Option<&Action<T>> {
        let index = self.current_frame?;
        self.frames[index].action.as_ref()
    }

    pub(crate) fn set_current_frame_action(&mut self, action: Action<T>) {
        if let Some(index) = self.current_frame {
            self.frames[index].action = Some(action);
        }
    }

    pub(crate) fn set_current_frame_resume(&mut self, resume: Arc<ContextPipe<T>>) {
        if let Some(index) = self.current_frame {
            self.frames[index].resume = Some(resume);
        }
    }

    /// Whether the current frame holds a call a `Return` has consumed,
    /// i.e. the context is resuming after that call completed.
    pub(crate) fn current_frame_call_returned(&self) -> bool {
        let Some(index) = self.current_frame else {
            return false;
        };
        let frame = &self.frames[index];
        frame.returned && matches!(frame.action, Some(Action::Call(_)))
    }

    /// Index of the most recent frame holding an un-returned call.
    pub(crate) fn find_unreturned_call(&self) -> Option<usize> {
        self.frames.iter().enumerate().rev().find_map(|(index, frame)| {
            match frame.action.as_ref() {
                Some(Action::Call(_)) if !frame.returned => Some(index),
                _ => None,
            }
        })
    }

    pub(crate) fn mark_call_returned(&mut self, index: usize) {
        if let Some(frame) = self.frames.get_mut(index) {
            frame.returned = true;
        }
    }

    /// Rewind the current frame to a completed call's frame and hand
    /// back the resume pipe recorded there.
    pub(crate) fn resume_at(&mut self, index: usize) -> Option<Arc<ContextPipe<T>>> {
        let resume = self.frames.get(index)?.resume.clone();
        self.current_frame = Some(index);
        resume
    }
}

impl<T: Message> fmt::Debug for ProcessingContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("event_type", &self.event_type)
            .field("message_id", &self.message_id)
            .field("correlation_id", &self.correlation_id)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}
