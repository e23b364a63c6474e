//! Re-entrant mutual exclusion plus one anonymous condition variable.

use crate::thread;
use crate::thread::WakeTarget;
use crate::Interrupted;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

struct MonitorState {
    /// Thread currently inside the monitor, if any.
    owner: Option<ThreadId>,

    /// Number of nested `enter` calls by the owner. Zero iff `owner`
    /// is `None`.
    depth: u32,
}

pub(crate) struct MonitorInner {
    state: Mutex<MonitorState>,

    /// Threads waiting to enter the monitor.
    entry: Condvar,

    /// The anonymous condition threads `wait` on.
    cond: Condvar,
}

impl WakeTarget for MonitorInner {
    fn wake(&self) {
        // Taking the state lock orders this signal after the waiter's
        // interrupted-flag check; without it the notification could
        // land between that check and the sleep and be lost.
        let _state = self.state.lock();
        self.cond.notify_all();
    }
}

/// A monitor allows a single thread to enter a critical area, and lets
/// threads inside it synchronize on an anonymous condition.
///
/// Entry is re-entrant: the owning thread may `enter` again, and the
/// monitor is released only when every `enter` has been matched by an
/// `exit`. `wait` atomically releases the full recursion while
/// sleeping and restores it on wakeup. Spurious wakeups are permitted;
/// callers re-check their predicates.
///
/// Calling `exit`, `wait`, or a notify method from a thread that is not
/// inside the monitor is a programming error and panics.
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Default for Monitor {
    fn default() -> Self {
        Monitor::new()
    }
}

impl Monitor {
    /// Creates a new, unowned monitor.
    pub fn new() -> Self {
        Monitor {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(MonitorState {
                    owner: None,
                    depth: 0,
                }),
                entry: Condvar::new(),
                cond: Condvar::new(),
            }),
        }
    }

    /// Enters the monitor, blocking until it is free. Re-entrant.
    pub fn enter(&self) {
        let me = std::thread::current().id();
        let mut state = self.inner.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
            return;
        }
        while state.owner.is_some() {
            self.inner.entry.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = 1;
    }

    /// Enters the monitor if it is free or already owned by the calling
    /// thread. Returns false without blocking otherwise.
    pub fn try_enter(&self) -> bool {
        let me = std::thread::current().id();
        let mut state = self.inner.state.lock();
        match state.owner {
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            Some(_) => false,
            None => {
                state.owner = Some(me);
                state.depth = 1;
                true
            }
        }
    }

    /// Exits the monitor, releasing it once every nested `enter` has
    /// been matched.
    pub fn exit(&self) {
        let me = std::thread::current().id();
        let mut state = self.inner.state.lock();
        assert_eq!(state.owner, Some(me), "monitor exited by non-owner");
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.inner.entry.notify_one();
        }
    }

    /// Waits on the monitor's condition until notified, until
    /// `timeout_ms` elapses (0 waits indefinitely), or until the
    /// calling thread is interrupted.
    ///
    /// The caller must be inside the monitor. The full recursion depth
    /// is released while sleeping and restored before this returns,
    /// including on the `Err(Interrupted)` path; when the interrupted
    /// flag is already set on entry, no release happens at all.
    pub fn wait(&self, timeout_ms: u64) -> Result<(), Interrupted> {
        self.wait_inner(timeout_ms, true)
    }

    /// Like [`wait`](Monitor::wait) but ignores the calling thread's
    /// interrupted flag. Used for waits that must not return early,
    /// such as a non-interruptible wait for completion.
    pub fn wait_uninterruptibly(&self, timeout_ms: u64) {
        let _ = self.wait_inner(timeout_ms, false);
    }

    fn wait_inner(&self, timeout_ms: u64, interruptible: bool) -> Result<(), Interrupted> {
        let me = std::thread::current().id();
        let thread_state = thread::current_state();

        if interruptible && thread_state.is_interrupted() {
            return Err(Interrupted);
        }

        let mut state = self.inner.state.lock();
        assert_eq!(state.owner, Some(me), "monitor waited on by non-owner");

        // Release the full recursion and let an entry waiter in.
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.inner.entry.notify_one();

        if interruptible {
            thread_state.set_wait_target(Some(self.inner.clone()));
        }

        // The flag may have been set between the check above and the
        // target registration; re-check while still holding the state
        // lock so the interrupter's wake cannot be lost.
        let mut was_interrupted = interruptible && thread_state.is_interrupted();
        if !was_interrupted {
            if timeout_ms == 0 {
                self.inner.cond.wait(&mut state);
            } else {
                let _ = self
                    .inner
                    .cond
                    .wait_for(&mut state, Duration::from_millis(timeout_ms));
            }
            was_interrupted = interruptible && thread_state.is_interrupted();
        }

        if interruptible {
            thread_state.set_wait_target(None);
        }

        // Re-acquire at the saved depth before reporting anything.
        while state.owner.is_some() {
            self.inner.entry.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = depth;

        if was_interrupted {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Wakes a single thread waiting on the condition. The choice of
    /// thread is arbitrary. The caller must be inside the monitor.
    pub fn notify_one(&self) {
        let me = std::thread::current().id();
        let state = self.inner.state.lock();
        assert_eq!(state.owner, Some(me), "monitor notified by non-owner");
        drop(state);
        self.inner.cond.notify_one();
    }

    /// Wakes every thread waiting on the condition. The caller must be
    /// inside the monitor.
    pub fn notify_all(&self) {
        let me = std::thread::current().id();
        let state = self.inner.state.lock();
        assert_eq!(state.owner, Some(me), "monitor notified by non-owner");
        drop(state);
        self.inner.cond.notify_all();
    }

    /// Wakes every waiter without requiring the caller to be inside the
    /// monitor and without any wait precondition having been released.
    ///
    /// Waiters observe a wakeup indistinguishable from a spurious one
    /// and re-check their predicates; this is how maintenance cycles
    /// (idle-expiry checks, dispatcher re-evaluation) are forced.
    pub fn signal_all(&self) {
        let _state = self.inner.state.lock();
        self.inner.cond.notify_all();
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held = match self.inner.state.try_lock() {
            Some(state) => state.owner.is_some(),
            None => true,
        };
        fmt.debug_struct("Monitor").field("held", &held).finish()
    }
}
