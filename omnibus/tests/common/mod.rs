#![allow(dead_code)]

use omnibus::{
    AcceptingBehavior, BoxError, ExceptionHandler, Message, ProcessingContext, Subscriber,
};
use std::sync::{
    Arc, Condvar, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

// ============================================================================
// Test Subscribers
// ============================================================================

/// Records every delivered payload in order.
pub struct Recorder<T> {
    items: Mutex<Vec<T>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

impl<T: Message + Clone> Subscriber<T> for Recorder<T> {
    fn accept(&self, message: &T) -> Result<AcceptingBehavior, BoxError> {
        self.items.lock().unwrap().push(message.clone());
        Ok(AcceptingBehavior::Remain)
    }
}

/// Counts deliveries, optionally detaching after the first.
pub struct CountingSubscriber {
    pub count: Arc<AtomicUsize>,
    pub behavior: AcceptingBehavior,
}

impl CountingSubscriber {
    pub fn remaining(count: Arc<AtomicUsize>) -> Self {
        Self {
            count,
            behavior: AcceptingBehavior::Remain,
        }
    }

    pub fn one_shot(count: Arc<AtomicUsize>) -> Self {
        Self {
            count,
            behavior: AcceptingBehavior::Unsubscribe,
        }
    }
}

impl<T: Message> Subscriber<T> for CountingSubscriber {
    fn accept(&self, _message: &T) -> Result<AcceptingBehavior, BoxError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(self.behavior)
    }
}

// ============================================================================
// Blocking Gate
// ============================================================================

/// Holds delivering threads until opened, so tests can observe queues
/// in a known state.
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            signal: Condvar::new(),
            waiting: AtomicUsize::new(0),
        })
    }

    /// Block the calling thread until the gate opens.
    pub fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
        drop(open);
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }

    /// Number of threads currently blocked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Exception Capture
// ============================================================================

/// Captures every reported error, configurable abort decision.
pub struct CapturingHandler {
    errors: Mutex<Vec<String>>,
    abort_delivery: bool,
}

impl CapturingHandler {
    pub fn aborting() -> Arc<Self> {
        Arc::new(Self {
            errors: Mutex::new(Vec::new()),
            abort_delivery: true,
        })
    }

    pub fn continuing() -> Arc<Self> {
        Arc::new(Self {
            errors: Mutex::new(Vec::new()),
            abort_delivery: false,
        })
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl<T: Message> ExceptionHandler<T> for CapturingHandler {
    fn should_abort_delivery(&self, _context: &ProcessingContext<T>, _error: &BoxError) -> bool {
        self.abort_delivery
    }

    fn on_delivery_error(&self, _context: &ProcessingContext<T>, error: BoxError) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn on_filter_error(&self, _context: &ProcessingContext<T>, error: BoxError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll a condition until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
