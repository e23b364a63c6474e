//! State mutators: the only path by which an operation modifies engine
//! state.

use crate::operation::Operation;
use crate::state::State;
use smallvec::SmallVec;
use std::sync::Arc;

/// Hooks run around an operation's body under an exclusive hold of
/// engine state.
///
/// `mutate_pre` runs after the dispatcher commits to executing the
/// operation and before its body starts; `mutate_post` runs after the
/// body finishes, whether it completed, was interrupted, was skipped,
/// or panicked. A mutator must not queue or wait on another operation
/// while the exclusive hold is in effect.
pub trait StateMutator: Send + Sync {
    /// Alters state to reflect that the operation is about to execute.
    fn mutate_pre(&self, state: &mut State, op: &Operation) {
        let _ = (state, op);
    }

    /// Alters state to reflect that the operation has finished.
    fn mutate_post(&self, state: &mut State, op: &Operation) {
        let _ = (state, op);
    }
}

/// A shared handle to a state mutator.
pub type StateMutatorRef = Arc<dyn StateMutator>;

/// Mutators chained in declaration order; each hook runs every link in
/// that order.
#[derive(Clone, Default)]
pub struct MutatorChain {
    links: SmallVec<[StateMutatorRef; 2]>,
}

impl MutatorChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        MutatorChain::default()
    }

    /// Appends a link.
    pub fn push(&mut self, mutator: StateMutatorRef) {
        self.links.push(mutator);
    }

    /// Drops every link.
    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// True when the chain has no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub(crate) fn links(&self) -> &[StateMutatorRef] {
        &self.links
    }
}

impl StateMutator for MutatorChain {
    fn mutate_pre(&self, state: &mut State, op: &Operation) {
        for mutator in &self.links {
            mutator.mutate_pre(state, op);
        }
    }

    fn mutate_post(&self, state: &mut State, op: &Operation) {
        for mutator in &self.links {
            mutator.mutate_post(state, op);
        }
    }
}

impl std::fmt::Debug for MutatorChain {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("MutatorChain")
            .field("links", &self.links.len())
            .finish()
    }
}
