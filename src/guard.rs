//! Guards: the conditions engine state must meet for an operation to
//! run.

use crate::operation::Operation;
use crate::state::State;
use smallvec::SmallVec;
use std::sync::Arc;

/// A pair of predicates the dispatcher consults before running an
/// operation, both evaluated under a shared hold of engine state.
///
/// `can_execute` answers "could this operation run right now";
/// `must_cancel` answers "has state made this operation impossible".
/// Returning false from both leaves the operation queued for a later
/// pass. Guards may read the operation but must not mutate it or the
/// state.
pub trait Guard: Send + Sync {
    /// True if an engine whose state is `state` could execute the
    /// operation immediately.
    fn can_execute(&self, state: &State, op: &Operation) -> bool;

    /// True if the operation can never execute against `state` and
    /// must be canceled. Binding: once the dispatcher observes it, the
    /// body will never run.
    fn must_cancel(&self, state: &State, op: &Operation) -> bool;
}

/// A shared handle to a guard.
pub type GuardRef = Arc<dyn Guard>;

/// Guards chained in declaration order.
///
/// The chain permits execution only when every link does, and demands
/// cancellation as soon as any link does.
#[derive(Clone, Default)]
pub struct GuardChain {
    links: SmallVec<[GuardRef; 2]>,
}

impl GuardChain {
    /// Creates an empty chain, which permits everything and cancels
    /// nothing.
    pub fn new() -> Self {
        GuardChain::default()
    }

    /// Appends a link.
    pub fn push(&mut self, guard: GuardRef) {
        self.links.push(guard);
    }

    /// Drops every link.
    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// True when the chain has no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Guard for GuardChain {
    fn can_execute(&self, state: &State, op: &Operation) -> bool {
        self.links.iter().all(|guard| guard.can_execute(state, op))
    }

    fn must_cancel(&self, state: &State, op: &Operation) -> bool {
        self.links.iter().any(|guard| guard.must_cancel(state, op))
    }
}

impl std::fmt::Debug for GuardChain {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("GuardChain")
            .field("links", &self.links.len())
            .finish()
    }
}
