//! A collection for callers that manage groups of operations.

use crate::engine::Engine;
use crate::operation::Operation;
use parking_lot::Mutex;

/// An owned list of operations with bulk queue, interrupt, and wait.
///
/// Typical use is a component that spins up several operations and must
/// tear them all down together: drop the list (or call
/// [`terminate`](OperationList::terminate)) and every operation in it
/// is interrupted and waited out.
#[derive(Default)]
pub struct OperationList {
    ops: Mutex<Vec<Operation>>,
}

impl OperationList {
    /// Creates an empty list.
    pub fn new() -> Self {
        OperationList::default()
    }

    /// Appends an operation.
    pub fn add(&self, op: Operation) {
        self.ops.lock().push(op);
    }

    /// Removes an operation, if present.
    pub fn remove(&self, op: &Operation) {
        let mut ops = self.ops.lock();
        if let Some(index) = ops.iter().position(|other| other == op) {
            ops.remove(index);
        }
    }

    /// Queues every operation in the list on `engine`, in list order.
    pub fn queue_all(&self, engine: &Engine) {
        for op in self.snapshot() {
            engine.queue(&op);
        }
    }

    /// Interrupts every operation in the list.
    pub fn interrupt_all(&self) {
        for op in self.snapshot() {
            op.interrupt();
        }
    }

    /// Waits for every operation in the list to stop.
    ///
    /// Returns true when every stop was observed; with `interruptible`
    /// set, stops early and returns false once the calling thread is
    /// interrupted.
    pub fn wait_for(&self, interruptible: bool) -> bool {
        for op in self.snapshot() {
            if !op.wait_for(interruptible) && interruptible {
                return false;
            }
        }
        true
    }

    /// Drops every stopped operation from the list.
    pub fn prune(&self) {
        self.ops.lock().retain(|op| !op.has_stopped());
    }

    /// Interrupts everything, waits out every stop, and prunes.
    pub fn terminate(&self) {
        self.interrupt_all();
        self.wait_for(false);
        self.prune();
    }

    /// True when the list holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Number of operations currently held.
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    // Waiting happens against a snapshot so other threads may add and
    // remove while a wait is in progress.
    fn snapshot(&self) -> Vec<Operation> {
        self.ops.lock().clone()
    }
}

impl Drop for OperationList {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for OperationList {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("OperationList")
            .field("len", &self.len())
            .finish()
    }
}
