//! Blocking mutual exclusion, for critical sections long enough that
//! busy-waiting would waste a core: inode I/O, directory updates, and
//! anything that can touch the block device.

use core::sync::atomic::{AtomicBool, Ordering};

use super::{Blocker, Lock, RawLock, SpinBlocker};

/// Suspends the calling thread (via a `Blocker`) rather than spinning.
/// Channel identity is the lock's own address, mirroring the teacher's
/// `Sleeplock`, which wakes on the address of the lock itself.
pub struct RawSleeplock<'b> {
    locked: AtomicBool,
    blocker: &'b dyn Blocker,
}

pub type Sleeplock<'b, T> = Lock<RawSleeplock<'b>, T>;
pub type SleeplockGuard<'s, 'b, T> = super::Guard<'s, RawSleeplock<'b>, T>;

impl<'b> RawSleeplock<'b> {
    pub const fn new(blocker: &'b dyn Blocker) -> Self {
        Self {
            locked: AtomicBool::new(false),
            blocker,
        }
    }

    fn channel(&self) -> usize {
        self as *const Self as usize
    }
}

impl RawLock for RawSleeplock<'_> {
    fn acquire(&self) {
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.blocker.block(self.channel());
        }
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
        self.blocker.wake(self.channel());
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<'b, T> Sleeplock<'b, T> {
    pub const fn new(data: T, blocker: &'b dyn Blocker) -> Self {
        Self {
            raw: RawSleeplock::new(blocker),
            data: core::cell::UnsafeCell::new(data),
        }
    }
}

/// A statically-allocated sleeplock that hasn't been handed a real
/// `Blocker` yet. Used by modules built before the scheduler is wired in;
/// `SpinBlocker` makes `acquire` degrade to a spin-loop rather than fail.
pub static DEFAULT_BLOCKER: SpinBlocker = SpinBlocker;
