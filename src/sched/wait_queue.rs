//! Sleep/wake primitive generalizing the ad-hoc "set state Blocked, yield,
//! retry" loops the syscall layer used to hand-roll for pipes and `wait`.
//!
//! A process that calls `sleep_*` stays physically present in the runqueue
//! (matching how this scheduler already treats `Blocked` entries) — it is
//! just skipped by `schedule_next` until something calls `wake_one`/
//! `wake_all` on the same queue.

use alloc::vec::Vec;

use crate::sync::spinlock::SpinLock;
use crate::task::process::ProcessId;

pub struct WaitQueue {
    sleepers: SpinLock<Vec<ProcessId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue { sleepers: SpinLock::new(Vec::new()) }
    }

    /// Block the calling task until woken. Not interruptible by a pending
    /// signal — used for short, structural waits (a mutex's critical
    /// section, a slab growth) where interruption would leave invariants
    /// half-established.
    pub fn sleep_uninterruptible(&self) {
        let me = crate::sched::current_pid();
        self.sleepers.lock().push(me);
        crate::sched::block_current_and_yield();
    }

    /// Block the calling task until woken or a signal becomes pending.
    /// Returns `false` if it woke up due to a signal rather than a real
    /// wake-up — the caller is expected to remove itself from the queue in
    /// that case (its pid is left in `sleepers` otherwise, matching a wake).
    pub fn sleep_interruptible(&self) -> bool {
        let me = crate::sched::current_pid();
        self.sleepers.lock().push(me);
        loop {
            crate::sched::block_current_and_yield();
            if crate::sched::has_pending_signal(me) {
                self.sleepers.lock().retain(|&p| p != me);
                return false;
            }
            if !self.sleepers.lock().contains(&me) {
                return true;
            }
            // Spurious resume with neither a signal nor a real wake
            // recorded yet — go back to sleep.
            self.sleepers.lock().push(me);
        }
    }

    pub fn wake_one(&self) {
        let mut sleepers = self.sleepers.lock();
        if !sleepers.is_empty() {
            let pid = sleepers.remove(0);
            crate::sched::set_ready(pid);
        }
    }

    pub fn wake_all(&self) {
        let mut sleepers = self.sleepers.lock();
        for pid in sleepers.drain(..) {
            crate::sched::set_ready(pid);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sleepers.lock().is_empty()
    }
}
