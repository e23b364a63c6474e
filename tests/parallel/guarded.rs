//! Guards defer and cancel against engine state.

use crate::support::{init_logs, small_engine, CancelAtLeast, IntegerEquals, SetIntegerAfter};
use modest::{Operation, State, StateMutator};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn deferred_until_state_permits() {
    init_logs();
    let engine = small_engine(2);
    engine.with_state_mut(|state| state.set_integer("k", 0));
    engine.start();

    let order = Arc::new(Mutex::new(Vec::new()));

    // A cannot run until k becomes 1, which only B's post-mutator does.
    let a = {
        let order = order.clone();
        Operation::new(move || order.lock().push("a"))
    };
    a.set_guard(Arc::new(IntegerEquals { key: "k", value: 1 }));

    let b = {
        let order = order.clone();
        Operation::new(move || order.lock().push("b"))
    };
    b.set_state_mutator(Arc::new(SetIntegerAfter { key: "k", value: 1 }));

    engine.queue(&a);
    engine.queue(&b);

    assert!(a.wait_for(true));
    assert!(b.wait_for(true));
    engine.stop();

    assert_eq!(*order.lock(), vec!["b", "a"]);
    assert!(!a.is_canceled() && !b.is_canceled());
    assert_eq!(engine.with_state(|state| state.get_integer("k")), Some(1));
}

#[test]
fn canceled_once_state_forbids() {
    init_logs();
    let engine = small_engine(2);
    engine.with_state_mut(|state| state.set_integer("k", 0));
    engine.start();

    let ran_b = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let b = {
        let ran_b = ran_b.clone();
        Operation::new(move || ran_b.store(true, std::sync::atomic::Ordering::SeqCst))
    };
    b.set_state_mutator(Arc::new(SetIntegerAfter { key: "k", value: 1 }));

    let ran_a = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let a = {
        let ran_a = ran_a.clone();
        Operation::new(move || ran_a.store(true, std::sync::atomic::Ordering::SeqCst))
    };
    a.set_guard(Arc::new(CancelAtLeast { key: "k", value: 1 }));
    // Keep A parked behind a second guard until B's mutation lands, so
    // the cancellation is observed deterministically.
    a.add_guard(Arc::new(IntegerEquals { key: "k", value: 1 }));

    engine.queue(&b);
    engine.queue(&a);

    assert!(a.wait_for(true));
    assert!(b.wait_for(true));
    engine.stop();

    assert!(ran_b.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!ran_a.load(std::sync::atomic::Ordering::SeqCst));
    assert!(a.is_canceled());
    assert!(a.has_stopped());
    assert!(!b.is_canceled());
}

/// Counts how many mutator hooks are inside the exclusive hold at
/// once.
struct Overlap {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StateMutator for Overlap {
    fn mutate_pre(&self, state: &mut State, _op: &Operation) {
        self.record(state);
    }
    fn mutate_post(&self, state: &mut State, _op: &Operation) {
        self.record(state);
    }
}

impl Overlap {
    fn record(&self, state: &mut State) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        state.increment_integer("hooks", 1);
        std::thread::sleep(Duration::from_millis(1));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn mutators_never_overlap() {
    init_logs();
    let engine = small_engine(4);
    engine.start();

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let ops: Vec<Operation> = (0..8)
        .map(|_| {
            let op = Operation::new(|| {});
            op.set_state_mutator(Arc::new(Overlap {
                active: active.clone(),
                peak: peak.clone(),
            }));
            op
        })
        .collect();

    for op in &ops {
        engine.queue(op);
    }
    for op in &ops {
        assert!(op.wait_for(true));
    }
    engine.stop();

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    // Eight operations, a pre and a post hook each.
    assert_eq!(
        engine.with_state(|state| state.get_integer("hooks")),
        Some(16)
    );
}
