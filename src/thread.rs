//! Cooperative thread interruption.
//!
//! The operating system gives us no portable way to interrupt a thread
//! that is blocked in one of our primitives, so the crate keeps a small
//! per-thread state: an interrupted flag plus the wait target the
//! thread is currently sleeping on, if any. Setting the flag wakes the
//! target so interruptible waits can observe it promptly. The framework
//! sets and queries this state exclusively; user bodies poll it via
//! [`interrupted`] or by blocking in an interruptible primitive.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something a blocked thread can be woken out of.
///
/// Implementations must tolerate `wake` racing with the waiter going to
/// sleep: the convention is to take the same mutex the waiter holds
/// around its condition check before signalling.
pub(crate) trait WakeTarget: Send + Sync {
    fn wake(&self);
}

pub(crate) struct ThreadState {
    interrupted: AtomicBool,

    /// The interruptible wait the thread is currently parked in, if
    /// any. Set by the waiter immediately before sleeping, cleared on
    /// wakeup.
    wait_target: Mutex<Option<Arc<dyn WakeTarget>>>,
}

impl ThreadState {
    fn new() -> Self {
        ThreadState {
            interrupted: AtomicBool::new(false),
            wait_target: Mutex::new(None),
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_wait_target(&self, target: Option<Arc<dyn WakeTarget>>) {
        *self.wait_target.lock() = target;
    }
}

thread_local! {
    static CURRENT: Arc<ThreadState> = Arc::new(ThreadState::new());
}

pub(crate) fn current_state() -> Arc<ThreadState> {
    CURRENT.with(|state| state.clone())
}

/// A sendable handle onto a thread's interruption state.
///
/// Obtained from [`current`]; typically captured so that another thread
/// can later interrupt this one (for example, an operation records the
/// handle of the worker executing its body).
#[derive(Clone)]
pub struct ThreadHandle {
    state: Arc<ThreadState>,
}

impl ThreadHandle {
    /// Sets the thread's interrupted flag and wakes it if it is blocked
    /// in an interruptible wait.
    ///
    /// Interruption is advisory: a thread that never polls its flag and
    /// never blocks interruptibly will not notice.
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);

        // Snapshot the target and drop the slot lock before waking, so
        // this thread never holds the slot lock and a monitor lock at
        // the same time.
        let target = self.state.wait_target.lock().clone();
        if let Some(target) = target {
            target.wake();
        }
    }

    /// Reads the thread's interrupted flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.state.is_interrupted()
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("ThreadHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Returns a handle onto the calling thread's interruption state.
pub fn current() -> ThreadHandle {
    ThreadHandle {
        state: current_state(),
    }
}

/// Reads the calling thread's interrupted flag without clearing it.
pub fn interrupted() -> bool {
    CURRENT.with(|state| state.is_interrupted())
}

/// Clears the calling thread's interrupted flag, returning the value it
/// had.
pub fn clear_interrupted() -> bool {
    CURRENT.with(|state| state.interrupted.swap(false, Ordering::SeqCst))
}
