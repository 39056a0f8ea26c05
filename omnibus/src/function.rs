//! # Message Function
//!
//! Request/reply over the bus. A request is published with a fresh
//! correlation id; the matching reply is recognized by carrying either
//! that correlation id or a correlation answering the request's message
//! id. The caller blocks on a [`ResponseFuture`] instead of wiring a
//! subscriber by hand.
//!
//! The response subscriber and the failure listeners are registered
//! before the request is published, so even a fully synchronous bus
//! cannot answer before anyone is listening.

use crate::bus::MessageBus;
use crate::context::ProcessingContext;
use crate::error::PipeError;
use omnibus_core::{
    AcceptingBehavior, BoxError, CorrelationId, EventType, ExceptionListenerId, Message,
    SubscriptionId,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a request produced no usable response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No response arrived before the timeout elapsed.
    #[error("no response arrived within the timeout")]
    Timeout,

    /// The request or its response raised an error on the bus.
    #[error("request failed during delivery: {0}")]
    DeliveryFailed(String),
}

/// The reply to one request.
#[derive(Debug)]
pub struct Response<T: Message> {
    payload: T,
    error_payload: Option<T>,
    correlation_id: Option<CorrelationId>,
}

impl<T: Message> Response<T> {
    /// The reply payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The error payload, if the responder attached one.
    pub fn error_payload(&self) -> Option<&T> {
        self.error_payload.as_ref()
    }

    /// Whether the responder answered without an error payload.
    pub fn is_success(&self) -> bool {
        self.error_payload.is_none()
    }

    /// The correlation id the reply carried.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Consume the response, yielding its payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

struct ResponseState<T: Message> {
    slot: Mutex<Option<Result<Response<T>, RequestError>>>,
    done: Condvar,
}

impl<T: Message> ResponseState<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// First completion wins; later ones are dropped.
    fn complete(&self, outcome: Result<Response<T>, RequestError>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.done.notify_all();
        }
    }

    fn wait(&self, timeout: Duration) -> Result<Response<T>, RequestError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            if self.done.wait_until(&mut slot, deadline).timed_out() {
                return slot.take().unwrap_or(Err(RequestError::Timeout));
            }
        }
    }

    fn is_done(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn peek_successful(&self) -> bool {
        matches!(&*self.slot.lock(), Some(Ok(response)) if response.is_success())
    }
}

/// Request/reply helper bound to one bus.
pub struct MessageFunction<T: Message + Clone> {
    bus: Arc<MessageBus<T>>,
}

impl<T: Message + Clone> MessageFunction<T> {
    /// A function publishing requests on the given bus.
    pub fn new(bus: Arc<MessageBus<T>>) -> Self {
        Self { bus }
    }

    /// Publish a request and obtain a future for its reply.
    ///
    /// The reply is expected under `response_event_type`, carrying
    /// either the request's correlation id or a correlation answering
    /// the request's message id.
    pub fn request(
        &self,
        event_type: EventType,
        response_event_type: EventType,
        payload: T,
    ) -> Result<ResponseFuture<T>, PipeError> {
        let correlation = CorrelationId::fresh();
        let context =
            ProcessingContext::for_event(event_type.clone(), payload).with_correlation_id(correlation);
        let request_id = context.message_id();
        let state = Arc::new(ResponseState::new());

        let subscription_id = self.bus.subscribe_raw(response_event_type.clone(), {
            let state = state.clone();
            move |reply: &ProcessingContext<T>| {
                let answers_request = reply
                    .correlation_id()
                    .is_some_and(|c| c == correlation || c.matches(&request_id));
                if !answers_request {
                    return Ok(AcceptingBehavior::Remain);
                }
                state.complete(Ok(Response {
                    payload: reply.payload().clone(),
                    error_payload: reply.error_payload().cloned(),
                    correlation_id: reply.correlation_id(),
                }));
                Ok(AcceptingBehavior::Unsubscribe)
            }
        });

        let failure_listener = {
            let state = state.clone();
            move |context: &ProcessingContext<T>, error: &BoxError| {
                let concerns_request = context.message_id() == request_id
                    || context
                        .correlation_id()
                        .is_some_and(|c| c == correlation || c.matches(&request_id));
                if concerns_request {
                    state.complete(Err(RequestError::DeliveryFailed(error.to_string())));
                }
            }
        };
        let listener_ids = [
            self.bus
                .register_exception_listener(event_type, failure_listener.clone()),
            self.bus
                .register_exception_listener(response_event_type, failure_listener),
        ];

        let future = ResponseFuture {
            bus: self.bus.clone(),
            state,
            subscription_id,
            listener_ids,
        };
        self.bus.send_context(context)?;
        Ok(future)
    }

    /// Build the reply context answering a request.
    ///
    /// Prefers the request's own correlation id; a request sent without
    /// one is answered via its message id.
    pub fn answer(
        request: &ProcessingContext<T>,
        response_event_type: EventType,
        payload: T,
    ) -> ProcessingContext<T> {
        let correlation = request
            .correlation_id()
            .unwrap_or_else(|| CorrelationId::answer_to(&request.message_id()));
        ProcessingContext::for_event(response_event_type, payload).with_correlation_id(correlation)
    }
}

/// Handle for one outstanding request.
///
/// Dropping the future detaches its response subscriber and failure
/// listeners from the bus.
pub struct ResponseFuture<T: Message + Clone> {
    bus: Arc<MessageBus<T>>,
    state: Arc<ResponseState<T>>,
    subscription_id: SubscriptionId,
    listener_ids: [ExceptionListenerId; 2],
}

impl<T: Message + Clone> ResponseFuture<T> {
    /// Block until the reply arrives or the timeout elapses.
    pub fn get(self, timeout: Duration) -> Result<Response<T>, RequestError> {
        self.state.wait(timeout)
    }

    /// Whether a reply or failure has already arrived.
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Whether a reply arrived and carries no error payload.
    pub fn was_successful(&self) -> bool {
        self.state.peek_successful()
    }
}

impl<T: Message + Clone> Drop for ResponseFuture<T> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription_id);
        for id in self.listener_ids {
            self.bus.unregister_exception_listener(id);
        }
    }
}
