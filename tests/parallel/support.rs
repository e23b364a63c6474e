use modest::{Engine, EngineConfig, Guard, Operation, State, StateMutator};
use std::time::{Duration, Instant};

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `predicate` for up to five seconds.
pub fn eventually(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

pub fn small_engine(max_workers: usize) -> Engine {
    Engine::with_config(EngineConfig {
        max_workers,
        idle_expire_ms: 0,
        stack_size: None,
    })
}

/// Permits execution once the integer under `key` equals `value`.
pub struct IntegerEquals {
    pub key: &'static str,
    pub value: i64,
}

impl Guard for IntegerEquals {
    fn can_execute(&self, state: &State, _op: &Operation) -> bool {
        state.get_integer(self.key) == Some(self.value)
    }
    fn must_cancel(&self, _state: &State, _op: &Operation) -> bool {
        false
    }
}

/// Demands cancellation once the integer under `key` reaches `value`.
pub struct CancelAtLeast {
    pub key: &'static str,
    pub value: i64,
}

impl Guard for CancelAtLeast {
    fn can_execute(&self, _state: &State, _op: &Operation) -> bool {
        true
    }
    fn must_cancel(&self, state: &State, _op: &Operation) -> bool {
        matches!(state.get_integer(self.key), Some(current) if current >= self.value)
    }
}

/// Writes `value` under `key` after the body runs.
pub struct SetIntegerAfter {
    pub key: &'static str,
    pub value: i64,
}

impl StateMutator for SetIntegerAfter {
    fn mutate_post(&self, state: &mut State, _op: &Operation) {
        state.set_integer(self.key, self.value);
    }
}
