//! Busy-waiting mutual exclusion, backed by `spin::Mutex`'s atomic.

use core::sync::atomic::{AtomicBool, Ordering};

use super::{Lock, RawLock};

/// Busy-waits until the lock is free. Appropriate for short critical
/// sections such as the frame table, the buffer cache, or the swap bitmap
/// (§5: "contention is acceptable at the scale of a teaching kernel").
pub struct RawSpinlock {
    locked: AtomicBool,
}

pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'s, T> = super::Guard<'s, RawSpinlock, T>;

impl RawSpinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for RawSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for RawSpinlock {
    fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawSpinlock::new(),
            data: core::cell::UnsafeCell::new(data),
        }
    }
}
