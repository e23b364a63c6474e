//! The single-threaded scheduler that turns a queue plus engine state
//! into work for the pool.

use crate::guard::Guard;
use crate::monitor::Monitor;
use crate::mutator::{MutatorChain, StateMutator};
use crate::operation::Operation;
use crate::pool::WorkerPool;
use crate::runnable::{Runnable, RunnableRef};
use crate::state::{State, StateCell};
use crate::thread;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct DispatcherInner {
    /// Operations awaiting dispatch, in queue order. Only the dispatch
    /// thread removes; anyone may append.
    queue: Mutex<VecDeque<Operation>>,

    /// Parks the dispatch thread between passes.
    monitor: Monitor,

    /// Bumped by every wake source so a notification arriving during a
    /// pass is never slept through.
    wakeups: AtomicU64,

    dispatching: AtomicBool,

    state: Arc<StateCell>,
    pool: WorkerPool,

    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// Dispatches queued operations.
///
/// A dedicated dispatch thread wakes on each enqueue, each worker
/// completion, and each engine-state write, walks the queue in order,
/// and for every operation either cancels it (its guard demands it),
/// hands it to the worker pool (its guard permits it and the pool has
/// room), or leaves it queued for a later pass.
pub struct OperationDispatcher {
    inner: Arc<DispatcherInner>,
}

impl OperationDispatcher {
    pub(crate) fn new(pool: WorkerPool) -> Self {
        OperationDispatcher {
            inner: Arc::new(DispatcherInner {
                queue: Mutex::new(VecDeque::new()),
                monitor: Monitor::new(),
                wakeups: AtomicU64::new(0),
                dispatching: AtomicBool::new(false),
                state: Arc::new(StateCell::new()),
                pool,
                thread: Mutex::new(None),
            }),
        }
    }

    /// The worker pool operations are dispatched to.
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Number of operations awaiting dispatch.
    pub fn queued_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// True while the dispatch thread is running.
    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatching.load(Ordering::SeqCst)
    }

    pub(crate) fn state_cell(&self) -> &Arc<StateCell> {
        &self.inner.state
    }

    /// Appends an operation and wakes the dispatch thread.
    pub(crate) fn queue_operation(&self, op: Operation) {
        trace!("queueing operation {:?}", op);
        self.inner.queue.lock().push_back(op);
        wake(&self.inner);
    }

    /// Routes an operation straight through the cancel path, never
    /// touching the queue. Used when the engine is stopped.
    pub(crate) fn cancel_operation(&self, op: Operation) {
        finish_canceled(&self.inner, op);
    }

    /// Pulls an operation back out of the queue. False when it was
    /// already taken (dispatched, canceled, or drained).
    pub(crate) fn remove_queued(&self, op: &Operation) -> bool {
        let mut queue = self.inner.queue.lock();
        match queue.iter().position(|queued| queued == op) {
            Some(index) => {
                let _ = queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Wakes the dispatch thread so it re-evaluates guards; called
    /// after every engine-state write.
    pub(crate) fn wake(&self) {
        wake(&self.inner);
    }

    /// Spawns the dispatch thread. A no-op while one is running.
    pub(crate) fn start_dispatching(&self) {
        if self.inner.dispatching.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("modest-dispatch".to_owned())
            .spawn(move || dispatch_loop(inner))
            .expect("failed to spawn dispatch thread");
        *self.inner.thread.lock() = Some(handle);
    }

    /// Halts and joins the dispatch thread. Queued operations stay
    /// queued. A no-op when none is running.
    pub(crate) fn stop_dispatching(&self) {
        self.inner.dispatching.store(false, Ordering::SeqCst);
        wake(&self.inner);
        if let Some(handle) = self.inner.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Drives every queued (never started) operation through the
    /// cancel path.
    pub(crate) fn cancel_queued(&self) {
        let drained: Vec<Operation> = self.inner.queue.lock().drain(..).collect();
        if !drained.is_empty() {
            debug!("canceling {} queued operations", drained.len());
        }
        for op in drained {
            finish_canceled(&self.inner, op);
        }
    }
}

impl std::fmt::Debug for OperationDispatcher {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("OperationDispatcher")
            .field("dispatching", &self.is_dispatching())
            .field("queued", &self.queued_count())
            .finish()
    }
}

fn wake(inner: &DispatcherInner) {
    inner.wakeups.fetch_add(1, Ordering::SeqCst);
    // Entering the monitor serializes with the dispatch thread's
    // park: either it sees the bumped counter before sleeping, or it
    // is already parked and this notification reaches it.
    inner.monitor.enter();
    inner.monitor.notify_all();
    inner.monitor.exit();
}

fn dispatch_loop(inner: Arc<DispatcherInner>) {
    debug!("dispatch thread started");
    while inner.dispatching.load(Ordering::SeqCst) {
        let seen = inner.wakeups.load(Ordering::SeqCst);
        if dispatch_pass(&inner) {
            continue;
        }
        // Nothing moved: park until some wake source fires, unless one
        // already did during the pass.
        inner.monitor.enter();
        if inner.wakeups.load(Ordering::SeqCst) == seen && inner.dispatching.load(Ordering::SeqCst)
        {
            inner.monitor.wait_uninterruptibly(0);
        }
        inner.monitor.exit();
    }
    debug!("dispatch thread exiting");
}

enum Action {
    Dispatch(Operation),
    Cancel(Operation),
}

/// One walk over the queue. Returns true when anything was dispatched
/// or canceled.
fn dispatch_pass(inner: &Arc<DispatcherInner>) -> bool {
    let mut actions = Vec::new();
    {
        let mut queue = inner.queue.lock();

        // Capacity is consumed per dispatch decision so one pass never
        // commits more work than the pool can take without blocking.
        let mut capacity = inner.pool.capacity();

        let mut index = 0;
        while index < queue.len() {
            let op = queue[index].clone();
            let guards = op.guard_chain();

            // Shared hold of engine state, inside the queue lock.
            let (must_cancel, can_execute) = inner.state.read(|state| {
                (
                    guards.must_cancel(state, &op),
                    guards.can_execute(state, &op),
                )
            });

            if must_cancel {
                let _ = queue.remove(index);
                actions.push(Action::Cancel(op));
            } else if can_execute && capacity > 0 {
                capacity -= 1;
                let _ = queue.remove(index);
                actions.push(Action::Dispatch(op));
            } else {
                index += 1;
            }
        }
    }

    // Transitions and hand-offs happen outside the queue lock: the
    // cancel path takes the engine-state lock and operation monitors,
    // and a pre-mutator must be able to run user code while new
    // operations are being queued.
    let progress = !actions.is_empty();
    for action in actions {
        match action {
            Action::Cancel(op) => finish_canceled(inner, op),
            Action::Dispatch(op) => dispatch_one(inner, op),
        }
    }
    progress
}

/// Commits one operation: pre-mutators under an exclusive state hold,
/// then the trampoline goes to the pool.
fn dispatch_one(inner: &Arc<DispatcherInner>, op: Operation) {
    trace!("dispatching operation {:?}", op);
    op.mark_started();

    let mutators = op.mutator_chain();
    if !mutators.is_empty() {
        inner.state.write(|state| {
            // Contained like any other user-code failure: the panic
            // must not take the dispatch thread down.
            if catch_unwind(AssertUnwindSafe(|| mutators.mutate_pre(state, &op))).is_err() {
                warn!("pre-execution mutator panicked; dispatching anyway");
            }
        });
    }

    let trampoline: RunnableRef = Arc::new(Trampoline {
        op: op.clone(),
        inner: inner.clone(),
    });
    // Capacity was checked under the queue lock and the dispatch
    // thread is the pool's only submitter, so this cannot block unless
    // the cap was tuned down in the window; then it waits for room
    // rather than dropping the operation.
    if inner.pool.run(trampoline).is_err() {
        warn!("dispatch thread interrupted; canceling operation");
        finish_canceled(inner, op);
    }
}

/// The cancel path: post-mutators, then the terminal transition with
/// the canceled flag set.
fn finish_canceled(inner: &DispatcherInner, op: Operation) {
    trace!("canceling operation {:?}", op);
    let mutators = op.mutator_chain();
    if !mutators.is_empty() {
        inner
            .state
            .write(|state| run_post_mutators(state, &mutators, &op));
    }
    op.finish(true);
}

/// Runs the post-mutator chain in declaration order. A panicking link
/// is reported and does not prevent the links after it.
fn run_post_mutators(state: &mut State, mutators: &MutatorChain, op: &Operation) {
    for mutator in mutators.links() {
        if catch_unwind(AssertUnwindSafe(|| mutator.mutate_post(state, op))).is_err() {
            warn!("post-execution mutator panicked; continuing with the rest of the chain");
        }
    }
}

/// The job handed to the pool: wraps the user body with lifecycle
/// bookkeeping.
struct Trampoline {
    op: Operation,
    inner: Arc<DispatcherInner>,
}

impl Runnable for Trampoline {
    fn run(&self) {
        let op = &self.op;

        if op.is_interrupted() {
            trace!("skipping body of interrupted operation");
        } else {
            op.record_thread(thread::current());
            let body = op.runnable();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body.run())) {
                debug!("operation body panicked; storing the payload");
                op.store_failure(payload);
            }
            if thread::interrupted() {
                // An interruption delivered straight to the body's
                // thread latches on the operation.
                op.note_thread_interrupted();
            }
        }

        let mutators = op.mutator_chain();
        if !mutators.is_empty() {
            self.inner
                .state
                .write(|state| run_post_mutators(state, &mutators, op));
        }

        op.finish(false);
        wake(&self.inner);
    }
}
