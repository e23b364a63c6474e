//! Many threads queueing concurrently: nothing is lost and the worker
//! cap holds.

use crate::support::{init_logs, small_engine};
use modest::Operation;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const SUBMITTERS: usize = 8;
const OPS_PER_SUBMITTER: usize = 1000;
const MAX_WORKERS: usize = 4;

#[test]
fn concurrent_submitters_lose_nothing() {
    init_logs();
    let engine = small_engine(MAX_WORKERS);
    engine.start();

    let ran = Arc::new(AtomicUsize::new(0));
    let sampling = Arc::new(AtomicBool::new(true));

    crossbeam_utils::thread::scope(|scope| {
        // One thread samples the worker count the whole time.
        let sampler = {
            let engine = &engine;
            let sampling = sampling.clone();
            scope.spawn(move |_| {
                let mut max_seen = 0;
                while sampling.load(Ordering::SeqCst) {
                    max_seen = max_seen.max(engine.pool().worker_count());
                    std::thread::yield_now();
                }
                max_seen
            })
        };

        let submitters: Vec<_> = (0..SUBMITTERS)
            .map(|_| {
                let engine = &engine;
                let ran = ran.clone();
                scope.spawn(move |_| {
                    let ops: Vec<Operation> = (0..OPS_PER_SUBMITTER)
                        .map(|_| {
                            let ran = ran.clone();
                            Operation::new(move || {
                                ran.fetch_add(1, Ordering::SeqCst);
                            })
                        })
                        .collect();
                    for op in &ops {
                        engine.queue(op);
                    }
                    ops
                })
            })
            .collect();

        for submitter in submitters {
            for op in submitter.join().unwrap() {
                assert!(op.wait_for(true));
                assert!(op.has_stopped());
                assert!(!op.is_canceled());
            }
        }

        sampling.store(false, Ordering::SeqCst);
        let max_seen = sampler.join().unwrap();
        assert!(
            max_seen <= MAX_WORKERS,
            "worker count peaked at {}",
            max_seen
        );
    })
    .unwrap();

    engine.stop();
    assert_eq!(ran.load(Ordering::SeqCst), SUBMITTERS * OPS_PER_SUBMITTER);
}
