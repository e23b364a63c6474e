//! Unguarded operations on a single worker run in enqueue order.

use crate::support::{init_logs, small_engine};
use modest::Operation;
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn fifo_order_on_one_worker() {
    init_logs();
    let engine = small_engine(1);
    engine.start();

    let order = Arc::new(Mutex::new(Vec::new()));
    let ops: Vec<Operation> = (0..10)
        .map(|index| {
            let order = order.clone();
            Operation::new(move || {
                order.lock().push(index);
            })
        })
        .collect();

    for op in &ops {
        engine.queue(op);
    }
    for op in &ops {
        assert!(op.wait_for(true));
        assert!(op.has_stopped());
        assert!(!op.is_canceled());
    }
    engine.stop();

    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}
