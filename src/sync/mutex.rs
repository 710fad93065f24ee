//! Task-context mutual exclusion, layered on a spinlock plus a wait queue.
//!
//! Unlike [`crate::sync::spinlock::SpinLock`], a [`Mutex`] may be held across
//! a sleep: a task that loses the race to acquire blocks on the mutex's own
//! wait queue instead of burning CPU. This makes it unsafe to use from
//! interrupt context, where there is no task to block.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::sched::wait_queue::WaitQueue;
use crate::task::process::ProcessId;

/// 0 means unowned.
const UNOWNED: u64 = 0;

pub struct Mutex<T> {
    owner: AtomicU64,
    waiters: WaitQueue,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Mutex {
            owner: AtomicU64::new(UNOWNED),
            waiters: WaitQueue::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the mutex, blocking the current task if it is held.
    ///
    /// # Panics
    /// Acquiring a mutex already owned by the calling task is a developer
    /// error (the spec leaves this case undefined; this implementation
    /// treats it as fatal rather than silently deadlocking forever).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let me = crate::sched::current_pid().0;
        loop {
            match self
                .owner
                .compare_exchange(UNOWNED, me, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return MutexGuard { mutex: self },
                Err(holder) => {
                    if holder == me {
                        panic!("mutex: task {} attempted to re-lock a mutex it already owns", me);
                    }
                    self.waiters.sleep_uninterruptible();
                }
            }
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let me = crate::sched::current_pid().0;
        self.owner
            .compare_exchange(UNOWNED, me, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    fn unlock(&self) {
        self.owner.store(UNOWNED, Ordering::Release);
        self.waiters.wake_one();
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

// `ProcessId` is only referenced for documentation purposes above; the owner
// word is stored as a raw u64 so the mutex itself stays independent of the
// task module's layout.
#[allow(dead_code)]
fn _assert_process_id_is_u64_newtype(p: ProcessId) -> u64 {
    p.0
}
