//! Randomized mix of submissions, state writes, and interrupts.

use crate::support::{init_logs, small_engine, IntegerEquals};
use modest::{Engine, Operation};
use rand::Rng;
use std::sync::Arc;

const N_THREADS: usize = 4;
const N_OPS: usize = 200;
const N_KEYS: i64 = 4;

enum StressOp {
    QueuePlain,
    QueueGuarded(i64),
    WriteKey(i64),
    InterruptEarlier,
}

fn random_op(rng: &mut impl Rng) -> StressOp {
    match rng.gen_range(0..10) {
        0..=3 => StressOp::QueuePlain,
        4..=6 => StressOp::QueueGuarded(rng.gen_range(0..N_KEYS)),
        7..=8 => StressOp::WriteKey(rng.gen_range(0..N_KEYS)),
        _ => StressOp::InterruptEarlier,
    }
}

fn key_name(key: i64) -> &'static str {
    match key {
        0 => "k0",
        1 => "k1",
        2 => "k2",
        _ => "k3",
    }
}

fn stress_thread(engine: &Engine) -> Vec<Operation> {
    let mut rng = rand::thread_rng();
    let mut ops = Vec::new();
    for _ in 0..N_OPS {
        match random_op(&mut rng) {
            StressOp::QueuePlain => {
                let op = Operation::new(|| {});
                engine.queue(&op);
                ops.push(op);
            }
            StressOp::QueueGuarded(key) => {
                let op = Operation::new(|| {});
                op.set_guard(Arc::new(IntegerEquals {
                    key: key_name(key),
                    value: 1,
                }));
                engine.queue(&op);
                ops.push(op);
            }
            StressOp::WriteKey(key) => {
                let value = rng.gen_range(0..2);
                engine.with_state_mut(|state| state.set_integer(key_name(key), value));
            }
            StressOp::InterruptEarlier => {
                if let Some(index) = ops.len().checked_sub(1) {
                    ops[rng.gen_range(0..=index)].interrupt();
                }
            }
        }
    }
    ops
}

#[test]
fn stress() {
    init_logs();
    let engine = small_engine(8);
    engine.start();

    let ops: Vec<Operation> = crossbeam_utils::thread::scope(|scope| {
        let threads: Vec<_> = (0..N_THREADS)
            .map(|_| {
                let engine = &engine;
                scope.spawn(move |_| stress_thread(engine))
            })
            .collect();
        threads
            .into_iter()
            .flat_map(|thread| thread.join().unwrap())
            .collect()
    })
    .unwrap();

    // Open every gate so guarded stragglers can run.
    engine.with_state_mut(|state| {
        for key in 0..N_KEYS {
            state.set_integer(key_name(key), 1);
        }
    });

    for op in &ops {
        assert!(op.wait_for(true));
        assert!(op.has_stopped());
        assert!(!op.is_canceled());
        assert!(!op.has_failed());
    }
    engine.stop();
}
