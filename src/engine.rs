//! The engine facade: queue, start, stop.

use crate::dispatcher::OperationDispatcher;
use crate::operation::Operation;
use crate::pool::WorkerPool;
use crate::state::State;
use log::debug;
use parking_lot::Mutex;

/// Construction-time knobs for an engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Worker cap for the engine's pool. 0 runs bodies inline in the
    /// dispatch thread; [`WorkerPool::UNBOUNDED`] removes the cap.
    pub max_workers: usize,

    /// Milliseconds a worker may sit idle before terminating itself;
    /// 0 keeps workers forever.
    pub idle_expire_ms: u64,

    /// Stack size suggestion for worker threads; `None` leaves the
    /// platform default.
    pub stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_workers: 100,
            idle_expire_ms: 120_000,
            stack_size: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Status {
    /// Created; operations queue up and wait for `start`.
    Idle,
    Running,
    /// Stopped; operations queued now are canceled immediately.
    Stopped,
}

/// A modest engine: operations in, guarded and state-mutating
/// execution out.
///
/// The engine is the unit of isolation; any number may coexist in a
/// process, each with its own state, dispatcher, and pool. `start` and
/// `stop` are idempotent. Dropping the engine stops it.
pub struct Engine {
    dispatcher: OperationDispatcher,
    status: Mutex<Status>,

    /// Serializes `start` and `stop` against each other. Separate from
    /// `status` so `queue` (which bodies call re-entrantly) never
    /// blocks behind a stop in progress.
    lifecycle: Mutex<()>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Engine::with_config(EngineConfig::default())
    }

    /// Creates an engine sized by `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        let pool = WorkerPool::new(config.max_workers, config.idle_expire_ms);
        pool.set_stack_size(config.stack_size);
        Engine {
            dispatcher: OperationDispatcher::new(pool),
            status: Mutex::new(Status::Idle),
            lifecycle: Mutex::new(()),
        }
    }

    /// Queues `op` for execution.
    ///
    /// The operation may then be waited on with
    /// [`Operation::wait_for`]. On an engine that has not started yet
    /// it waits in the queue; on a stopped engine it is canceled
    /// immediately.
    pub fn queue(&self, op: &Operation) {
        if *self.status.lock() == Status::Stopped {
            debug!("queue on a stopped engine; canceling the operation");
            self.dispatcher.cancel_operation(op.clone());
            return;
        }
        self.dispatcher.queue_operation(op.clone());

        // A stop may have raced in between the status read and the
        // enqueue; whoever finds the operation still queued cancels it.
        if *self.status.lock() == Status::Stopped && self.dispatcher.remove_queued(op) {
            self.dispatcher.cancel_operation(op.clone());
        }
    }

    /// Begins executing queued operations. A no-op on a running
    /// engine; a stopped engine starts again.
    pub fn start(&self) {
        let _lifecycle = self.lifecycle.lock();
        let mut status = self.status.lock();
        if *status == Status::Running {
            return;
        }
        debug!("starting engine");
        self.dispatcher.start_dispatching();
        *status = Status::Running;
    }

    /// Stops the engine: no further dispatching, running bodies are
    /// interrupted and waited out, queued operations are canceled.
    ///
    /// Returns only after every started body has finished; no body
    /// runs after it returns. A no-op on an engine that is not
    /// running. Must not be called from inside an operation body.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        {
            let mut status = self.status.lock();
            if *status != Status::Running {
                return;
            }
            // Flipped before the drain so queueing routes to the
            // cancel path from here on.
            *status = Status::Stopped;
        }
        debug!("stopping engine");
        self.dispatcher.stop_dispatching();
        self.dispatcher.pool().interrupt_all();
        self.dispatcher.cancel_queued();
        self.dispatcher.pool().join_all();
        // Bodies may have queued re-entrantly up until join_all
        // returned; sweep those through the cancel path too.
        self.dispatcher.cancel_queued();
    }

    /// Reads engine state under a shared hold.
    pub fn with_state<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        self.dispatcher.state_cell().read(f)
    }

    /// Writes engine state under an exclusive hold, then wakes the
    /// dispatcher so guards blocked on the old state re-evaluate.
    ///
    /// This is the engine owner's seeding path; operations themselves
    /// modify state through their mutators.
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let result = self.dispatcher.state_cell().write(f);
        self.dispatcher.wake();
        result
    }

    /// The engine's worker pool, for live tuning and inspection.
    pub fn pool(&self) -> &WorkerPool {
        self.dispatcher.pool()
    }

    /// The engine's dispatcher.
    pub fn dispatcher(&self) -> &OperationDispatcher {
        &self.dispatcher
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        // An engine dropped without ever starting still owes its
        // queued operations a terminal state.
        self.dispatcher.cancel_queued();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Engine")
            .field("status", &*self.status.lock())
            .field("queued", &self.dispatcher.queued_count())
            .finish()
    }
}
