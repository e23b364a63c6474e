#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

//! A modest concurrency core. Work is wrapped in [`Operation`]s and
//! queued on an [`Engine`]; a single dispatch thread evaluates each
//! operation's [`Guard`] against shared engine [`State`] and hands
//! runnable operations to a bounded pool of reusable worker threads.
//! [`StateMutator`] hooks run around the body under an exclusive hold
//! of that state, and are the only path by which operations modify it.
//! Operations are cheap-to-clone handles that can be waited on and
//! cooperatively interrupted.
//!
//! The synchronization primitives underneath (the re-entrant
//! [`Monitor`], the [`SharedLock`] with writer recursion, the
//! [`Semaphore`] that meters worker spawn capacity, and the
//! cooperative interruption support in [`thread`]) are exported too,
//! since bodies that want to block interruptibly build on them.

mod dispatcher;
mod engine;
mod guard;
mod monitor;
mod mutator;
mod operation;
mod operation_list;
mod pool;
mod runnable;
mod semaphore;
mod shared_lock;
mod state;
pub mod thread;

pub use crate::dispatcher::OperationDispatcher;
pub use crate::engine::{Engine, EngineConfig};
pub use crate::guard::{Guard, GuardChain, GuardRef};
pub use crate::monitor::Monitor;
pub use crate::mutator::{MutatorChain, StateMutator, StateMutatorRef};
pub use crate::operation::{BodyPanic, Operation};
pub use crate::operation_list::OperationList;
pub use crate::pool::WorkerPool;
pub use crate::runnable::{Runnable, RunnableRef};
pub use crate::semaphore::Semaphore;
pub use crate::shared_lock::SharedLock;
pub use crate::state::{State, Value};

/// The calling thread's interrupted flag cut a blocking call short.
///
/// Returned by the interruptible waits ([`Monitor::wait`],
/// [`Semaphore::acquire`]); [`Operation::wait_for`] folds it into its
/// boolean result. The flag stays set until
/// [`thread::clear_interrupted`] is called, so a caller that intends
/// to keep blocking must clear it first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "interrupted")
    }
}

impl std::error::Error for Interrupted {}
