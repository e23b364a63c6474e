//! The unit-of-work capability.

use std::sync::Arc;

/// Something that can be run.
///
/// The framework observes nothing of the run beyond its termination; a
/// body that wants to report results does so through state it shares
/// with its creator, and a body that wants to stop early polls its
/// thread's interrupted flag (see [`crate::thread::interrupted`]).
pub trait Runnable: Send + Sync {
    /// Runs some implementation-specific work.
    fn run(&self);
}

/// A shared handle to a runnable.
pub type RunnableRef = Arc<dyn Runnable>;

/// Closures are runnables.
impl<F> Runnable for F
where
    F: Fn() + Send + Sync,
{
    fn run(&self) {
        self()
    }
}
