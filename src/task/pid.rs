//! PID allocation: a fixed-size bitmap, same shape as the kernel's other
//! small identifier spaces (IPC keys, file descriptors).

use crate::kerror::KernelError;
use crate::sync::spinlock::SpinLock;

pub const MAX_PROCESSES: usize = 256;

struct PidBitmap {
    used: [bool; MAX_PROCESSES],
    /// Next index to try on `alloc` — the bitmap is scanned forward from
    /// here, wrapping around, instead of always restarting at 1.
    next_hint: usize,
}

impl PidBitmap {
    const fn new() -> Self {
        let mut used = [false; MAX_PROCESSES];
        used[0] = true; // pid 0 is the kernel's own bootstrap task, never handed out
        PidBitmap { used, next_hint: 1 }
    }

    fn alloc(&mut self) -> Result<u64, KernelError> {
        for i in (self.next_hint..MAX_PROCESSES).chain(1..self.next_hint) {
            if !self.used[i] {
                self.used[i] = true;
                self.next_hint = if i + 1 >= MAX_PROCESSES { 1 } else { i + 1 };
                return Ok(i as u64);
            }
        }
        Err(KernelError::ResourceLimit)
    }

    fn free(&mut self, pid: u64) {
        let idx = pid as usize;
        assert!(idx > 0 && idx < MAX_PROCESSES, "pid: {} out of range on free", pid);
        assert!(self.used[idx], "pid: double-free of pid {}", pid);
        self.used[idx] = false;
    }
}

static PIDS: SpinLock<PidBitmap> = SpinLock::new(PidBitmap::new());

pub fn alloc() -> Result<u64, KernelError> {
    PIDS.lock().alloc()
}

pub fn free(pid: u64) {
    if pid != 0 {
        PIDS.lock().free(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_zero_is_never_handed_out() {
        let mut bm = PidBitmap::new();
        let p = bm.alloc().unwrap();
        assert_ne!(p, 0);
        bm.free(p);
    }

    #[test]
    fn exhaustion_is_recoverable() {
        let mut bm = PidBitmap::new();
        let mut taken = alloc::vec::Vec::new();
        loop {
            match bm.alloc() {
                Ok(p) => taken.push(p),
                Err(KernelError::ResourceLimit) => break,
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }
        assert_eq!(taken.len(), MAX_PROCESSES - 1);
        for p in taken {
            bm.free(p);
        }
    }
}
