//! A counting semaphore built on the monitor.

use crate::monitor::Monitor;
use crate::Interrupted;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A counting semaphore whose maximum is live-tunable.
///
/// Counters are only mutated inside the monitor; the atomics exist so
/// the accessors can read without entering it. Lowering the maximum
/// below the number of permits in use does not revoke anything: excess
/// holders drain naturally and no new permit is granted until usage
/// falls under the new maximum.
pub struct Semaphore {
    monitor: Monitor,
    max: AtomicUsize,
    used: AtomicUsize,
}

impl Semaphore {
    /// Creates a semaphore with `max` grantable permits.
    pub fn new(max: usize) -> Self {
        Semaphore {
            monitor: Monitor::new(),
            max: AtomicUsize::new(max),
            used: AtomicUsize::new(0),
        }
    }

    /// Acquires a permit, blocking until one is available or the
    /// calling thread is interrupted.
    pub fn acquire(&self) -> Result<(), Interrupted> {
        self.monitor.enter();
        loop {
            let max = self.max.load(Ordering::SeqCst);
            let used = self.used.load(Ordering::SeqCst);
            if used < max {
                self.used.store(used + 1, Ordering::SeqCst);
                self.monitor.exit();
                return Ok(());
            }
            if let Err(interrupted) = self.monitor.wait(0) {
                self.monitor.exit();
                return Err(interrupted);
            }
        }
    }

    /// Acquires a permit if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        self.monitor.enter();
        let max = self.max.load(Ordering::SeqCst);
        let used = self.used.load(Ordering::SeqCst);
        let granted = used < max;
        if granted {
            self.used.store(used + 1, Ordering::SeqCst);
        }
        self.monitor.exit();
        granted
    }

    /// Returns a permit, waking one blocked acquirer.
    pub fn release(&self) {
        self.monitor.enter();
        let used = self.used.load(Ordering::SeqCst);
        assert!(used > 0, "semaphore released more permits than acquired");
        self.used.store(used - 1, Ordering::SeqCst);
        self.monitor.notify_one();
        self.monitor.exit();
    }

    /// Changes the number of grantable permits and wakes all blocked
    /// acquirers so they re-check against the new maximum.
    pub fn set_max_permits(&self, max: usize) {
        self.monitor.enter();
        self.max.store(max, Ordering::SeqCst);
        self.monitor.notify_all();
        self.monitor.exit();
    }

    /// The configured maximum.
    pub fn max_permits(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    /// Permits currently held.
    pub fn used_permits(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Permits that an `acquire` would be granted right now.
    pub fn available_permits(&self) -> usize {
        let max = self.max.load(Ordering::SeqCst);
        max.saturating_sub(self.used.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Semaphore")
            .field("max", &self.max_permits())
            .field("used", &self.used_permits())
            .finish()
    }
}
