//! The engine's shared state store.

use crate::shared_lock::SharedLock;
use std::cell::UnsafeCell;
use std::hash::BuildHasherDefault;

pub(crate) type FxIndexMap<K, V> =
    indexmap::IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;

/// A value stored in engine state.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A boolean flag.
    Boolean(bool),
    /// A signed integer counter.
    Integer(i64),
    /// An owned string.
    String(String),
}

/// A typed key/value store shared by the operations on one engine.
///
/// The core imposes no schema: callers pick the keys and meanings.
/// Guards read the store under a shared hold of the engine-state lock;
/// mutators modify it under an exclusive hold. Insertion order is
/// preserved, which keeps debug output stable.
#[derive(Debug, Default)]
pub struct State {
    entries: FxIndexMap<String, Value>,
}

impl State {
    /// Creates an empty store.
    pub fn new() -> Self {
        State::default()
    }

    /// Stores a boolean under `name`, replacing any prior value.
    pub fn set_boolean(&mut self, name: impl Into<String>, value: bool) {
        self.entries.insert(name.into(), Value::Boolean(value));
    }

    /// Reads the boolean stored under `name`, if there is one and it is
    /// a boolean.
    pub fn get_boolean(&self, name: &str) -> Option<bool> {
        match self.entries.get(name) {
            Some(Value::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    /// Stores an integer under `name`, replacing any prior value.
    pub fn set_integer(&mut self, name: impl Into<String>, value: i64) {
        self.entries.insert(name.into(), Value::Integer(value));
    }

    /// Reads the integer stored under `name`, if there is one and it is
    /// an integer.
    pub fn get_integer(&self, name: &str) -> Option<i64> {
        match self.entries.get(name) {
            Some(Value::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    /// `name1 - name2`, when both are present integers.
    pub fn integer_difference(&self, name1: &str, name2: &str) -> Option<i64> {
        Some(self.get_integer(name1)? - self.get_integer(name2)?)
    }

    /// Adds `delta` to the integer under `name`, treating a missing
    /// entry as zero. Returns the new value.
    pub fn increment_integer(&mut self, name: &str, delta: i64) -> i64 {
        let value = self.get_integer(name).unwrap_or(0) + delta;
        self.set_integer(name, value);
        value
    }

    /// Subtracts `delta` from the integer under `name`, treating a
    /// missing entry as zero. Returns the new value.
    pub fn decrement_integer(&mut self, name: &str, delta: i64) -> i64 {
        self.increment_integer(name, -delta)
    }

    /// Stores a string under `name`, replacing any prior value.
    pub fn set_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), Value::String(value.into()));
    }

    /// Reads the string stored under `name`, if there is one and it is
    /// a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Reads whatever is stored under `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Removes the entry under `name`, returning it.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The engine's state store paired with its shared/exclusive lock.
///
/// Guards get `&State` under a shared hold, mutators `&mut State` under
/// an exclusive hold; those closure-scoped accessors are the only ways
/// through. The `UnsafeCell` is sound because every reference handed
/// out is bounded by the corresponding hold.
pub(crate) struct StateCell {
    lock: SharedLock,
    cell: UnsafeCell<State>,
}

// The lock discipline above is what makes this sharable.
unsafe impl Sync for StateCell {}

struct SharedHold<'a>(&'a SharedLock);

impl Drop for SharedHold<'_> {
    fn drop(&mut self) {
        self.0.unlock_shared();
    }
}

struct ExclusiveHold<'a>(&'a SharedLock);

impl Drop for ExclusiveHold<'_> {
    fn drop(&mut self) {
        self.0.unlock_exclusive();
    }
}

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell {
            lock: SharedLock::new(),
            cell: UnsafeCell::new(State::new()),
        }
    }

    /// Runs `f` with the store under a shared hold.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        self.lock.lock_shared();
        let _hold = SharedHold(&self.lock);
        f(unsafe { &*self.cell.get() })
    }

    /// Runs `f` with the store under an exclusive hold.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.lock.lock_exclusive();
        let _hold = ExclusiveHold(&self.lock);
        f(unsafe { &mut *self.cell.get() })
    }
}
