//! Mutual exclusion primitives.
//!
//! The thread scheduler and its synchronization primitives are named as
//! external collaborators of this system: only their contracts matter here.
//! This module keeps the teacher crate's shape for locking — a generic
//! `Lock<R: RawLock, T>` wrapping a `RawLock` strategy and the protected
//! data in one `UnsafeCell`, with a RAII `Guard` — but implements the two
//! `RawLock` strategies (`Spinlock`, `Sleeplock`) on top of the portable
//! `spin` crate and a small `Blocker` trait instead of hand-rolled
//! architecture-specific atomics, since interrupt control belongs to the
//! collaborator, not to this crate.

pub(crate) mod sleeplock;
pub(crate) mod spinlock;

pub use sleeplock::{RawSleeplock, Sleeplock, SleeplockGuard, DEFAULT_BLOCKER};
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A locking strategy: how to wait for exclusive access.
pub trait RawLock {
    fn acquire(&self);
    fn release(&self);
    fn holding(&self) -> bool;
}

/// Generic mutual-exclusion wrapper, parameterized by locking strategy `R`.
pub struct Lock<R, T> {
    pub(crate) raw: R,
    pub(crate) data: UnsafeCell<T>,
}

// SAFETY: access to `data` is always mediated by `raw`.
unsafe impl<R: Sync, T: Send> Sync for Lock<R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    /// Acquires the lock, returning a guard providing exclusive access.
    pub fn lock(&self) -> Guard<'_, R, T> {
        self.raw.acquire();
        Guard { lock: self }
    }

    /// Returns a raw pointer to the protected data, bypassing the lock.
    ///
    /// # Safety
    ///
    /// The caller must already hold `self`'s lock (directly, or via some
    /// other invariant that rules out concurrent access).
    pub unsafe fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    pub fn holding(&self) -> bool {
        self.raw.holding()
    }

    /// Releases a lock that was acquired but whose guard was leaked
    /// (e.g. via `mem::forget`).
    ///
    /// # Safety
    ///
    /// Must only be used to balance a matching `acquire` with no live guard.
    pub unsafe fn force_unlock(&self) {
        self.raw.release();
    }
}

/// RAII guard granting exclusive access to a `Lock<R, T>`'s data.
pub struct Guard<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
}

impl<R: RawLock, T> Deref for Guard<'_, R, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies holding the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<R: RawLock, T> DerefMut for Guard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard implies holding the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<R: RawLock, T> Drop for Guard<'_, R, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

/// Contract an external scheduler must satisfy for a `Sleeplock` to suspend
/// the calling thread instead of busy-waiting. System calls, cache misses,
/// swap I/O, and page faults are all suspension points per the concurrency
/// model; none of them are modeled as blocking the CPU here because the
/// scheduler that performs the actual context switch is out of scope.
pub trait Blocker: Sync {
    /// Suspends the calling thread until `wake` is called for the same
    /// `channel`. May spuriously return early; callers must re-check their
    /// condition in a loop, as the teacher's `Sleeplock` does.
    fn block(&self, channel: usize);

    /// Wakes every thread blocked on `channel`.
    fn wake(&self, channel: usize);
}

/// A `Blocker` that never actually suspends: every `block` call returns
/// immediately. Used as the default so this crate is self-contained and its
/// pure logic is host-testable without wiring in a real scheduler.
pub struct SpinBlocker;

impl Blocker for SpinBlocker {
    fn block(&self, _channel: usize) {
        core::hint::spin_loop();
    }
    fn wake(&self, _channel: usize) {}
}

/// A rendezvous point identified by its own address, the way the teacher's
/// `WaitChannel` uses its address as the sleep/wakeup key. Built on
/// [`Blocker`] instead of a process table, so anything that needs a
/// condition to wait on — a child process's exit, a pipe becoming
/// non-empty — can embed one without depending on the scheduler directly.
pub struct WaitChannel {
    _padding: u8,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self { _padding: 0 }
    }

    fn channel(&self) -> usize {
        self as *const Self as usize
    }

    /// Suspends the caller until [`WaitChannel::wake`] is called on this
    /// channel. Spurious wakeups are possible; callers must re-check their
    /// own condition in a loop.
    pub fn wait(&self, blocker: &dyn Blocker) {
        blocker.block(self.channel());
    }

    /// Wakes every thread waiting on this channel.
    pub fn wake(&self, blocker: &dyn Blocker) {
        blocker.wake(self.channel());
    }
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}
