//! Interrupt-safe busy-wait exclusion.
//!
//! This is the only lock correct to take from interrupt context: it never
//! sleeps, never calls into the scheduler, and its critical sections are
//! expected to be short. Everything else in the kernel (the runqueue, each
//! wait-queue head, each IPC object, each ATA device) is protected by one of
//! these, per the lock-ordering rules in the concurrency model.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};
use core::ops::{Deref, DerefMut};

use super::cpu_relax;

/// A test-and-set spinlock guarding a `T`.
///
/// Unlike [`crate::sync::mutex::Mutex`], this type has no concept of an
/// owning task and never yields the CPU — acquiring it while already held by
/// the same caller deadlocks, by contract.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, spinning with a CPU-pause hint between attempts.
    /// Spinlocks never fail: a caller that cannot make progress here has a
    /// structural bug (an unbounded critical section, or a nested attempt by
    /// the same caller), not a recoverable error.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }
            while self.locked.load(Ordering::Relaxed) {
                cpu_relax();
            }
        }
    }

    /// Attempt to acquire the lock once; never blocks.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        // Release-store after the critical section's writes are visible to
        // whoever spins in next, matching the acquire load above.
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(0u32);
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn mutation_through_guard() {
        let lock = SpinLock::new(alloc::vec::Vec::<u32>::new());
        lock.lock().push(1);
        lock.lock().push(2);
        assert_eq!(*lock.lock(), alloc::vec![1, 2]);
    }
}
