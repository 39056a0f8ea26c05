//! # Pipe Layer
//!
//! The queueing/dispatch primitive underlying every pipeline stage.
//!
//! A pipe accepts values through [`Pipe::send`] and delivers each one to
//! a single delivery function fixed at construction:
//!
//! - **Synchronous**: delivery runs inline on the caller's thread; a
//!   delivery failure propagates back to the sender.
//! - **Asynchronous**: `send` enqueues into one bounded queue shared by a
//!   fixed pool of dedicated worker threads. A send never blocks: when
//!   the queue (plus in-flight slots) is at capacity it fails immediately
//!   with [`PipeError::QueueFull`].
//!
//! # Lifecycle
//!
//! `Open → Closing (draining or discarding) → Closed`. [`Pipe::close`]
//! is idempotent; `send` on a closed pipe fails fast. Closing with
//! `finish_remaining_tasks = true` lets the workers drain the backlog;
//! `false` discards every item that has not yet started (items already
//! started run to completion). [`Pipe::await_termination`] blocks the
//! caller until all workers are idle or the timeout elapses; it reports
//! a timeout by returning `false`, never by an error.

mod statistics;

pub use statistics::PipeStatistics;
pub(crate) use statistics::PipeStatisticsCollector;

use crate::error::PipeError;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use omnibus_core::BoxError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// The delivery function a pipe dispatches to.
pub type Delivery<T> = dyn Fn(T) -> Result<(), BoxError> + Send + Sync;

/// Worker pool and queue sizing for an asynchronous pipe.
#[derive(Debug, Clone)]
pub struct AsynchronousConfiguration {
    /// Number of dedicated worker threads.
    pub pool_size: usize,
    /// Queue capacity; `None` leaves the queue unbounded.
    pub queue_bound: Option<usize>,
}

impl AsynchronousConfiguration {
    /// Configuration with the given pool size and an unbounded queue.
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            queue_bound: None,
        }
    }

    /// Bound the queue to the given capacity.
    pub fn queue_bound(mut self, bound: usize) -> Self {
        self.queue_bound = Some(bound);
        self
    }
}

const STATE_OPEN: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_DISCARDING: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// A queueing/dispatch primitive delivering to one delivery function.
pub struct Pipe<T: Send + 'static> {
    inner: Inner<T>,
}

enum Inner<T: Send + 'static> {
    Synchronous(SynchronousPipe<T>),
    Asynchronous(AsynchronousPipe<T>),
}

impl<T: Send + 'static> Pipe<T> {
    /// Create a pipe that delivers inline on the caller's thread.
    pub fn synchronous<D>(delivery: D) -> Self
    where
        D: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            inner: Inner::Synchronous(SynchronousPipe {
                delivery: Box::new(delivery),
                state: AtomicU8::new(STATE_OPEN),
                statistics: Arc::new(PipeStatisticsCollector::default()),
            }),
        }
    }

    /// Create a pipe that delivers through a dedicated worker pool.
    pub fn asynchronous<D>(configuration: AsynchronousConfiguration, delivery: D) -> Self
    where
        D: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            inner: Inner::Asynchronous(AsynchronousPipe::start(configuration, Arc::new(delivery))),
        }
    }

    /// Hand one value to the delivery function, inline or via the queue.
    ///
    /// Asynchronous pipes never block here: at capacity the send fails
    /// with [`PipeError::QueueFull`] and the value is not accepted.
    pub fn send(&self, value: T) -> Result<(), PipeError> {
        match &self.inner {
            Inner::Synchronous(pipe) => pipe.send(value),
            Inner::Asynchronous(pipe) => pipe.send(value),
        }
    }

    /// Stop accepting new values; drain or discard the backlog.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn close(&self, finish_remaining_tasks: bool) {
        match &self.inner {
            Inner::Synchronous(pipe) => pipe.close(),
            Inner::Asynchronous(pipe) => pipe.close(finish_remaining_tasks),
        }
    }

    /// Whether `close` has been called.
    pub fn is_shutdown(&self) -> bool {
        match &self.inner {
            Inner::Synchronous(pipe) => pipe.state.load(Ordering::Acquire) != STATE_OPEN,
            Inner::Asynchronous(pipe) => pipe.shared.state.load(Ordering::Acquire) != STATE_OPEN,
        }
    }

    /// Block until the pipe is closed and all workers are idle, or the
    /// timeout elapses. Returns `false` on timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        match &self.inner {
            Inner::Synchronous(pipe) => pipe.await_termination(timeout),
            Inner::Asynchronous(pipe) => pipe.await_termination(timeout),
        }
    }

    /// Point-in-time snapshot of this pipe's counters.
    pub fn statistics(&self) -> PipeStatistics {
        self.statistics_collector().snapshot()
    }

    /// Deliver inline even when the pipe is already closed.
    ///
    /// Used for internal handoffs that must complete while a backlog
    /// drains; only meaningful for synchronous pipes.
    pub(crate) fn send_bypassing_shutdown(&self, value: T) -> Result<(), PipeError> {
        match &self.inner {
            Inner::Synchronous(pipe) => pipe.deliver(value),
            Inner::Asynchronous(pipe) => pipe.send(value),
        }
    }

    pub(crate) fn statistics_collector(&self) -> &Arc<PipeStatisticsCollector> {
        match &self.inner {
            Inner::Synchronous(pipe) => &pipe.statistics,
            Inner::Asynchronous(pipe) => &pipe.shared.statistics,
        }
    }

    /// Whether this pipe dispatches through a worker pool.
    pub fn is_asynchronous(&self) -> bool {
        matches!(self.inner, Inner::Asynchronous(_))
    }
}

struct SynchronousPipe<T> {
    delivery: Box<Delivery<T>>,
    state: AtomicU8,
    statistics: Arc<PipeStatisticsCollector>,
}

impl<T> SynchronousPipe<T> {
    fn send(&self, value: T) -> Result<(), PipeError> {
        if self.state.load(Ordering::Acquire) != STATE_OPEN {
            return Err(PipeError::Closed);
        }
        self.deliver(value)
    }

    fn deliver(&self, value: T) -> Result<(), PipeError> {
        self.statistics.message_accepted();
        match (self.delivery)(value) {
            Ok(()) => {
                self.statistics.message_delivered();
                Ok(())
            }
            Err(error) => {
                self.statistics.message_failed();
                Err(PipeError::Delivery(error))
            }
        }
    }

    fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        // A synchronous pipe never holds pending work; termination is
        // simply the closed state. Poll so a concurrent close is seen.
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.load(Ordering::Acquire) != STATE_OPEN {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1).min(timeout));
        }
    }
}

struct AsynchronousPipe<T: Send + 'static> {
    sender: ArcSwapOption<Sender<T>>,
    receiver: Receiver<T>,
    shared: Arc<AsynchronousShared>,
}

struct AsynchronousShared {
    state: AtomicU8,
    workers_alive: AtomicUsize,
    statistics: Arc<PipeStatisticsCollector>,
    idle_lock: Mutex<()>,
    idle_signal: Condvar,
}

impl AsynchronousShared {
    fn notify_idle(&self) {
        // Take the lock so a waiter between its check and its wait
        // cannot miss the wakeup.
        drop(self.idle_lock.lock());
        self.idle_signal.notify_all();
    }

    /// One worker is gone, whether it ran to completion or never
    /// started. The last one to go closes the pipe and wakes waiters,
    /// so `await_termination` cannot wait on workers that do not exist.
    fn worker_exited(&self) {
        if self.workers_alive.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.store(STATE_CLOSED, Ordering::Release);
            self.notify_idle();
        }
    }
}

impl<T: Send + 'static> AsynchronousPipe<T> {
    fn start(configuration: AsynchronousConfiguration, delivery: Arc<Delivery<T>>) -> Self {
        let (sender, receiver) = match configuration.queue_bound {
            Some(bound) => bounded(bound),
            None => unbounded(),
        };
        let pool_size = configuration.pool_size.max(1);
        let shared = Arc::new(AsynchronousShared {
            state: AtomicU8::new(STATE_OPEN),
            workers_alive: AtomicUsize::new(pool_size),
            statistics: Arc::new(PipeStatisticsCollector::default()),
            idle_lock: Mutex::new(()),
            idle_signal: Condvar::new(),
        });
        for index in 0..pool_size {
            let receiver: Receiver<T> = receiver.clone();
            let worker_shared = Arc::clone(&shared);
            let delivery = Arc::clone(&delivery);
            // Workers exit once every sender handle is dropped and the
            // queue has been drained.
            let spawned = thread::Builder::new()
                .name(format!("omnibus-pipe-{index}"))
                .spawn(move || worker_loop(receiver, worker_shared, delivery));
            if let Err(error) = spawned {
                tracing::error!(%error, "failed to spawn pipe worker");
                // A worker that never started still counts as exited,
                // otherwise the pipe could never reach the closed state.
                shared.worker_exited();
            }
        }
        Self {
            sender: ArcSwapOption::from_pointee(sender),
            receiver,
            shared,
        }
    }

    fn send(&self, value: T) -> Result<(), PipeError> {
        if self.shared.state.load(Ordering::Acquire) != STATE_OPEN {
            return Err(PipeError::Closed);
        }
        let sender = self.sender.load();
        let Some(sender) = sender.as_ref() else {
            return Err(PipeError::Closed);
        };
        // Count before enqueueing so a worker's decrement can never
        // observe the counter at zero.
        self.shared.statistics.message_queued();
        match sender.try_send(value) {
            Ok(()) => {
                self.shared.statistics.message_accepted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.shared.statistics.message_dequeued();
                Err(PipeError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.shared.statistics.message_dequeued();
                Err(PipeError::Closed)
            }
        }
    }

    fn close(&self, finish_remaining_tasks: bool) {
        let next_state = if finish_remaining_tasks {
            STATE_DRAINING
        } else {
            STATE_DISCARDING
        };
        let previous = self.shared.state.compare_exchange(
            STATE_OPEN,
            next_state,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if previous.is_err() {
            return;
        }
        tracing::debug!(
            finish_remaining_tasks,
            queued = self.shared.statistics.queued_now(),
            "closing asynchronous pipe"
        );
        // Dropping the sender lets the workers run the queue dry and exit.
        self.sender.store(None);
        if !finish_remaining_tasks {
            let mut discarded = 0u64;
            while self.receiver.try_recv().is_ok() {
                self.shared.statistics.message_dequeued();
                discarded += 1;
            }
            if discarded > 0 {
                tracing::warn!(discarded, "discarded queued messages on close");
            }
            self.shared.notify_idle();
        }
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.idle_lock.lock();
        loop {
            if self.shared.state.load(Ordering::Acquire) == STATE_CLOSED {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.shared
                .idle_signal
                .wait_for(&mut guard, deadline - now);
        }
    }
}

fn worker_loop<T: Send + 'static>(
    receiver: Receiver<T>,
    shared: Arc<AsynchronousShared>,
    delivery: Arc<Delivery<T>>,
) {
    while let Ok(value) = receiver.recv() {
        shared.statistics.message_dequeued();
        if shared.state.load(Ordering::Acquire) == STATE_DISCARDING {
            shared.notify_idle();
            continue;
        }
        match (delivery)(value) {
            Ok(()) => shared.statistics.message_delivered(),
            Err(error) => {
                shared.statistics.message_failed();
                tracing::error!(%error, "asynchronous delivery failed");
            }
        }
        shared.notify_idle();
    }
    shared.worker_exited();
}
