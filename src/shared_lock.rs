//! A lock that differentiates shared from exclusive holders.

use parking_lot::{Condvar, Mutex};
use std::thread::ThreadId;

struct LockState {
    /// Number of shared holders, excluding re-acquisitions by the
    /// exclusive owner.
    shared: usize,

    /// Thread holding the lock exclusively, if any.
    exclusive_owner: Option<ThreadId>,

    /// Nested exclusive acquisitions by the owner.
    exclusive_depth: usize,

    /// Shared re-acquisitions taken by the exclusive owner while it
    /// holds the lock exclusively. Invisible to other threads.
    owner_shared: usize,

    /// Writers that have begun waiting. Newly arriving readers queue
    /// behind them.
    writers_waiting: usize,
}

/// A shared/exclusive lock.
///
/// Any number of threads may hold the lock shared at once; an
/// exclusive acquisition waits for every shared holder to drain and
/// for any other exclusive holder to release. A thread that holds the
/// lock exclusively may re-acquire either mode without blocking, and
/// its shared re-acquisitions never become visible to other threads.
/// A writer that has begun waiting is preferred over newly arriving
/// readers.
///
/// Shared acquisition is not re-entrant: a thread that already holds
/// the lock shared (and does not hold it exclusively) must release
/// before acquiring shared again, or it may deadlock behind a waiting
/// writer.
///
/// Every unlock must match the mode of its acquire; a mismatch is a
/// programming error and panics where it is detectable.
pub struct SharedLock {
    state: Mutex<LockState>,
    readers: Condvar,
    writers: Condvar,
}

impl Default for SharedLock {
    fn default() -> Self {
        SharedLock::new()
    }
}

impl SharedLock {
    /// Creates a new, unheld lock.
    pub fn new() -> Self {
        SharedLock {
            state: Mutex::new(LockState {
                shared: 0,
                exclusive_owner: None,
                exclusive_depth: 0,
                owner_shared: 0,
                writers_waiting: 0,
            }),
            readers: Condvar::new(),
            writers: Condvar::new(),
        }
    }

    /// Acquires the lock shared, blocking while it is held exclusively
    /// by another thread or while a writer is waiting.
    pub fn lock_shared(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if state.exclusive_owner == Some(me) {
            state.owner_shared += 1;
            return;
        }
        while state.exclusive_owner.is_some() || state.writers_waiting > 0 {
            self.readers.wait(&mut state);
        }
        state.shared += 1;
    }

    /// Releases one shared hold.
    pub fn unlock_shared(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if state.exclusive_owner == Some(me) {
            assert!(state.owner_shared > 0, "unbalanced shared unlock");
            state.owner_shared -= 1;
            return;
        }
        assert!(state.shared > 0, "shared unlock without a shared hold");
        state.shared -= 1;
        if state.shared == 0 {
            self.writers.notify_one();
        }
    }

    /// Acquires the lock exclusively, blocking until all shared holders
    /// drain and any other exclusive holder releases. Re-entrant for
    /// the current owner.
    pub fn lock_exclusive(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        if state.exclusive_owner == Some(me) {
            state.exclusive_depth += 1;
            return;
        }
        state.writers_waiting += 1;
        while state.shared > 0 || state.exclusive_owner.is_some() {
            self.writers.wait(&mut state);
        }
        state.writers_waiting -= 1;
        state.exclusive_owner = Some(me);
        state.exclusive_depth = 1;
    }

    /// Releases one exclusive hold, freeing the lock once every nested
    /// acquisition has been matched.
    pub fn unlock_exclusive(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        assert_eq!(
            state.exclusive_owner,
            Some(me),
            "exclusive unlock by non-owner"
        );
        state.exclusive_depth -= 1;
        if state.exclusive_depth > 0 {
            return;
        }

        // Shared holds the owner took under the exclusive lock survive
        // it as ordinary shared holds.
        state.shared += state.owner_shared;
        state.owner_shared = 0;
        state.exclusive_owner = None;

        if state.shared == 0 && state.writers_waiting > 0 {
            self.writers.notify_one();
        } else {
            self.readers.notify_all();
        }
    }
}

impl std::fmt::Debug for SharedLock {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.state.try_lock() {
            Some(state) => {
                if state.exclusive_owner.is_some() {
                    "<exclusive>"
                } else if state.shared > 0 {
                    "<shared>"
                } else {
                    "<unheld>"
                }
            }
            None => "<contended>",
        };
        fmt.debug_struct("SharedLock").field("mode", &mode).finish()
    }
}
