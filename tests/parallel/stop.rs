//! Engine stop drains: started bodies finish, queued operations are
//! canceled, nothing runs afterwards.

use crate::support::{init_logs, small_engine};
use modest::Operation;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn stop_drains_started_and_cancels_queued() {
    init_logs();
    let engine = small_engine(4);
    engine.start();

    let bodies_entered = Arc::new(AtomicUsize::new(0));
    let bodies_finished = Arc::new(AtomicUsize::new(0));

    let mut ops = Vec::new();
    let mut ran_flags = Vec::new();
    for _ in 0..100 {
        let ran = Arc::new(AtomicBool::new(false));
        let op = {
            let ran = ran.clone();
            let entered = bodies_entered.clone();
            let finished = bodies_finished.clone();
            Operation::new(move || {
                entered.fetch_add(1, Ordering::SeqCst);
                ran.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                finished.fetch_add(1, Ordering::SeqCst);
            })
        };
        ops.push(op.clone());
        ran_flags.push(ran);
        engine.queue(&op);
    }

    std::thread::sleep(Duration::from_millis(20));
    assert!(engine.pool().worker_count() <= 4);
    engine.stop();

    // Every started body has finished by the time stop returns, and
    // none starts afterwards.
    let entered = bodies_entered.load(Ordering::SeqCst);
    let finished = bodies_finished.load(Ordering::SeqCst);
    assert_eq!(entered, finished);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(bodies_entered.load(Ordering::SeqCst), entered);

    let mut canceled = 0;
    for (op, ran) in ops.iter().zip(&ran_flags) {
        assert!(op.has_stopped());
        if op.is_canceled() {
            assert!(!ran.load(Ordering::SeqCst));
            canceled += 1;
        } else {
            assert!(ran.load(Ordering::SeqCst));
        }
    }
    // With a 20ms head start on 10ms bodies, most of the hundred are
    // still queued when stop lands.
    assert!(canceled > 0, "expected some operations to be canceled");
    assert_eq!(canceled + entered, 100);
}

#[test]
fn restart_after_stop() {
    init_logs();
    let engine = small_engine(2);
    engine.start();
    engine.stop();

    engine.start();
    let op = Operation::new(|| {});
    engine.queue(&op);
    assert!(op.wait_for(true));
    assert!(!op.is_canceled());
    engine.stop();
}
