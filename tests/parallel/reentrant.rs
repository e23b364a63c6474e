//! Bodies may queue further operations and wait on them.

use crate::support::{init_logs, small_engine};
use modest::{Engine, Operation};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn body_queues_and_waits_on_children() {
    init_logs();
    let engine = Arc::new(small_engine(4));
    engine.start();

    let completed = Arc::new(AtomicUsize::new(0));

    let parent = {
        let engine: Arc<Engine> = engine.clone();
        let completed = completed.clone();
        Operation::new(move || {
            let children: Vec<Operation> = (0..3)
                .map(|_| {
                    let completed = completed.clone();
                    Operation::new(move || {
                        completed.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();
            for child in &children {
                engine.queue(child);
            }
            for child in &children {
                assert!(child.wait_for(true));
            }
            completed.fetch_add(1, Ordering::SeqCst);
        })
    };

    engine.queue(&parent);
    assert!(parent.wait_for(true));
    assert_eq!(completed.load(Ordering::SeqCst), 4);
    assert!(!parent.is_canceled());
    engine.stop();
}

#[test]
fn nested_queueing_two_levels_deep() {
    init_logs();
    let engine = Arc::new(small_engine(4));
    engine.start();

    let leaf_ran = Arc::new(AtomicUsize::new(0));
    let outer = {
        let engine = engine.clone();
        let leaf_ran = leaf_ran.clone();
        Operation::new(move || {
            let inner = {
                let engine = engine.clone();
                let leaf_ran = leaf_ran.clone();
                Operation::new(move || {
                    let leaf = {
                        let leaf_ran = leaf_ran.clone();
                        Operation::new(move || {
                            leaf_ran.fetch_add(1, Ordering::SeqCst);
                        })
                    };
                    engine.queue(&leaf);
                    assert!(leaf.wait_for(true));
                })
            };
            engine.queue(&inner);
            assert!(inner.wait_for(true));
        })
    };

    engine.queue(&outer);
    assert!(outer.wait_for(true));
    assert_eq!(leaf_ran.load(Ordering::SeqCst), 1);
    engine.stop();
}
