//! Operation handles share one refcount block and release the wrapped
//! runnable exactly once.

use crate::support::{eventually, init_logs, small_engine};
use modest::{Operation, Runnable};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountsDrops {
    runs: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
}

impl Runnable for CountsDrops {
    fn run(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for CountsDrops {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn runnable_dropped_exactly_once() {
    init_logs();
    let runs = Arc::new(AtomicUsize::new(0));
    let drops = Arc::new(AtomicUsize::new(0));

    let engine = small_engine(2);
    engine.start();

    let op = Operation::new(CountsDrops {
        runs: runs.clone(),
        drops: drops.clone(),
    });

    // Spread handles across threads and drop them in arbitrary order.
    let handles: Vec<Operation> = (0..8).map(|_| op.clone()).collect();
    let joins: Vec<_> = handles
        .into_iter()
        .map(|handle| {
            std::thread::spawn(move || {
                assert!(handle.wait_for(true));
                drop(handle);
            })
        })
        .collect();

    engine.queue(&op);
    for join in joins {
        join.join().unwrap();
    }
    engine.stop();
    drop(op);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // The worker's own handle is released shortly after the body ends.
    assert!(eventually(|| drops.load(Ordering::SeqCst) == 1));
}

#[test]
fn equality_is_pointer_identity() {
    let op = Operation::new(|| {});
    let same = op.clone();
    let other = Operation::new(|| {});
    assert_eq!(op, same);
    assert_ne!(op, other);
}
