//! Auto-reset completion event shared by every slot of a session.
//!
//! The device sets it whenever any submitted slot finishes; the streaming
//! thread consumes it. One event stands in for N per-slot completions, so
//! the streaming loop relies on FIFO completion order and re-checks slot
//! flags after every wakeup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signalled,
    TimedOut,
    Stopped,
}

#[derive(Debug, Default)]
struct Inner {
    set: Mutex<bool>,
    cond: Condvar,
    stop: AtomicBool,
}

/// Binary auto-reset event plus a stop flag.
///
/// Cloning shares the same event.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event (device side). Wakes one waiter; stays set until consumed.
    pub fn set(&self) {
        let mut set = self.inner.set.lock();
        *set = true;
        self.inner.cond.notify_one();
    }

    /// Clear a pending set without waiting.
    pub fn reset(&self) {
        *self.inner.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.set.lock()
    }

    /// Block until the event is set, consuming it. Returns `Stopped` if a stop
    /// was requested before or during the wait.
    pub fn wait(&self) -> WaitOutcome {
        let mut set = self.inner.set.lock();
        loop {
            if self.inner.stop.load(Ordering::SeqCst) {
                return WaitOutcome::Stopped;
            }
            if *set {
                *set = false;
                return WaitOutcome::Signalled;
            }
            self.inner.cond.wait(&mut set);
        }
    }

    /// Bounded wait. Spurious condvar wakeups do not shorten the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut set = self.inner.set.lock();
        loop {
            if self.inner.stop.load(Ordering::SeqCst) {
                return WaitOutcome::Stopped;
            }
            if *set {
                *set = false;
                return WaitOutcome::Signalled;
            }
            if self.inner.cond.wait_until(&mut set, deadline).timed_out() {
                if *set {
                    *set = false;
                    return WaitOutcome::Signalled;
                }
                return WaitOutcome::TimedOut;
            }
        }
    }

    /// Ask every waiter to give up. Sticky until [`clear_stop`](Self::clear_stop).
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        let _guard = self.inner.set.lock();
        self.inner.cond.notify_all();
    }

    pub fn clear_stop(&self) {
        self.inner.stop.store(false, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }
}

/// Cross-thread handle that interrupts a blocked streaming loop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    signal: CompletionSignal,
}

impl StopHandle {
    pub(crate) fn new(signal: CompletionSignal) -> Self {
        Self { signal }
    }

    pub fn stop(&self) {
        self.signal.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_stop_requested()
    }
}
