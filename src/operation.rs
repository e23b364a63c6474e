//! Operations: reference-counted, waitable, interruptible units of
//! work.

use crate::guard::{GuardChain, GuardRef};
use crate::monitor::Monitor;
use crate::mutator::{MutatorChain, StateMutatorRef};
use crate::runnable::{Runnable, RunnableRef};
use crate::thread::ThreadHandle;
use log::debug;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The payload of a body that terminated by panicking.
///
/// Stored on the operation; the panic never crosses into the worker,
/// dispatcher, or engine.
pub struct BodyPanic(Box<dyn Any + Send + 'static>);

impl BodyPanic {
    pub(crate) fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
        BodyPanic(payload)
    }

    /// The panic message, when the payload was a string.
    pub fn message(&self) -> Option<&str> {
        if let Some(message) = self.0.downcast_ref::<&'static str>() {
            Some(message)
        } else {
            self.0.downcast_ref::<String>().map(String::as_str)
        }
    }

    /// The raw panic payload.
    pub fn into_inner(self) -> Box<dyn Any + Send + 'static> {
        self.0
    }
}

impl std::fmt::Debug for BodyPanic {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("BodyPanic")
            .field("message", &self.message())
            .finish()
    }
}

impl std::fmt::Display for BodyPanic {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(message) => write!(fmt, "operation body panicked: {}", message),
            None => write!(fmt, "operation body panicked"),
        }
    }
}

struct OperationImpl {
    runnable: RunnableRef,

    /// Guards the lifecycle transitions and parks completion waiters.
    monitor: Monitor,

    // Lifecycle flags. Queries are lock-free loads; every transition
    // happens inside the monitor followed by notify_all.
    started: AtomicBool,
    interrupted: AtomicBool,
    canceled: AtomicBool,
    stopped: AtomicBool,

    guards: Mutex<GuardChain>,
    mutators: Mutex<MutatorChain>,

    /// Thread currently executing the body, when any.
    thread: Mutex<Option<ThreadHandle>>,

    failure: Mutex<Option<BodyPanic>>,
}

/// A cheap-to-clone handle to a unit of work queued on an engine.
///
/// The lifecycle is one-way: queued, then running or canceled, then
/// stopped, and `stopped` is terminal. Any number of handles may
/// observe the operation; the last one dropped releases the wrapped
/// runnable. Equality is pointer identity.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationImpl>,
}

impl Operation {
    /// Creates an operation around `runnable`.
    pub fn new(runnable: impl Runnable + 'static) -> Self {
        Operation::from_ref(Arc::new(runnable))
    }

    /// Creates an operation around an already-shared runnable.
    pub fn from_ref(runnable: RunnableRef) -> Self {
        Operation {
            inner: Arc::new(OperationImpl {
                runnable,
                monitor: Monitor::new(),
                started: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                canceled: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                guards: Mutex::new(GuardChain::new()),
                mutators: Mutex::new(MutatorChain::new()),
                thread: Mutex::new(None),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Replaces the operation's guard. Ignored once the operation has
    /// started; call before queueing.
    pub fn set_guard(&self, guard: GuardRef) {
        if self.has_started() {
            debug!("ignoring set_guard on a started operation");
            return;
        }
        let mut guards = self.inner.guards.lock();
        guards.clear();
        guards.push(guard);
    }

    /// Chains another guard after any already present. Ignored once the
    /// operation has started; call before queueing.
    pub fn add_guard(&self, guard: GuardRef) {
        if self.has_started() {
            debug!("ignoring add_guard on a started operation");
            return;
        }
        self.inner.guards.lock().push(guard);
    }

    /// Replaces the operation's state mutator. Same rules as
    /// [`set_guard`](Operation::set_guard).
    pub fn set_state_mutator(&self, mutator: StateMutatorRef) {
        if self.has_started() {
            debug!("ignoring set_state_mutator on a started operation");
            return;
        }
        let mut mutators = self.inner.mutators.lock();
        mutators.clear();
        mutators.push(mutator);
    }

    /// Chains another state mutator after any already present. Same
    /// rules as [`set_guard`](Operation::set_guard).
    pub fn add_state_mutator(&self, mutator: StateMutatorRef) {
        if self.has_started() {
            debug!("ignoring add_state_mutator on a started operation");
            return;
        }
        self.inner.mutators.lock().push(mutator);
    }

    /// Blocks until the operation stops.
    ///
    /// Returns true if the stop was observed; false if `interruptible`
    /// and the calling thread's interrupted flag cut the wait short.
    pub fn wait_for(&self, interruptible: bool) -> bool {
        let monitor = &self.inner.monitor;
        monitor.enter();
        let mut observed_stop = true;
        while !self.has_stopped() {
            if interruptible {
                if monitor.wait(0).is_err() {
                    observed_stop = false;
                    break;
                }
            } else {
                monitor.wait_uninterruptibly(0);
            }
        }
        monitor.exit();
        observed_stop
    }

    /// Latches the operation's interrupted flag and, if a body is
    /// currently executing, signals that thread's interrupted flag.
    ///
    /// Advisory: a body notices by polling
    /// [`crate::thread::interrupted`] or by blocking in an
    /// interruptible primitive.
    pub fn interrupt(&self) {
        self.inner.monitor.enter();
        self.inner.interrupted.store(true, Ordering::SeqCst);
        if let Some(thread) = self.inner.thread.lock().as_ref() {
            thread.interrupt();
        }
        self.inner.monitor.exit();
    }

    /// True once [`interrupt`](Operation::interrupt) has been called,
    /// or the body's own thread was interrupted while it ran.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// True once the dispatcher has committed the operation for
    /// execution.
    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// True once the operation was canceled by its guard or by engine
    /// shutdown. A canceled operation still reaches `stopped`.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// True once the operation has reached its terminal state.
    pub fn has_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// True when the body terminated by panicking.
    pub fn has_failed(&self) -> bool {
        self.inner.failure.lock().is_some()
    }

    /// Takes the stored panic payload, if the body panicked.
    pub fn take_failure(&self) -> Option<BodyPanic> {
        self.inner.failure.lock().take()
    }

    pub(crate) fn runnable(&self) -> RunnableRef {
        self.inner.runnable.clone()
    }

    /// Snapshot of the guard chain; evaluated outside the chain lock so
    /// guards can inspect the operation freely.
    pub(crate) fn guard_chain(&self) -> GuardChain {
        self.inner.guards.lock().clone()
    }

    pub(crate) fn mutator_chain(&self) -> MutatorChain {
        self.inner.mutators.lock().clone()
    }

    /// Commits the operation for execution; guard and mutator edits are
    /// ignored from here on.
    pub(crate) fn mark_started(&self) {
        self.inner.monitor.enter();
        self.inner.started.store(true, Ordering::SeqCst);
        self.inner.monitor.exit();
    }

    /// Records the body's executing thread, propagating an interrupt
    /// that arrived before the body was underway.
    pub(crate) fn record_thread(&self, thread: ThreadHandle) {
        self.inner.monitor.enter();
        *self.inner.thread.lock() = Some(thread.clone());
        if self.is_interrupted() {
            thread.interrupt();
        }
        self.inner.monitor.exit();
    }

    /// Latches an interruption observed on the body's own thread.
    pub(crate) fn note_thread_interrupted(&self) {
        self.inner.monitor.enter();
        self.inner.interrupted.store(true, Ordering::SeqCst);
        self.inner.monitor.exit();
    }

    pub(crate) fn store_failure(&self, payload: Box<dyn Any + Send + 'static>) {
        *self.inner.failure.lock() = Some(BodyPanic::new(payload));
    }

    /// Drives the terminal transition and releases every waiter.
    pub(crate) fn finish(&self, canceled: bool) {
        self.inner.monitor.enter();
        if canceled {
            self.inner.canceled.store(true, Ordering::SeqCst);
        }
        *self.inner.thread.lock() = None;
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.monitor.notify_all();
        self.inner.monitor.exit();
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Operation {}

impl std::fmt::Debug for Operation {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Operation")
            .field("started", &self.has_started())
            .field("interrupted", &self.is_interrupted())
            .field("canceled", &self.is_canceled())
            .field("stopped", &self.has_stopped())
            .finish()
    }
}
