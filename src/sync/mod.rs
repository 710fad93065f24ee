pub mod spinlock;
pub mod mutex;

/// A single CPU-pause hint for spin bodies, kept as its own function so every
/// busy-wait loop in the kernel (locks, ATA status polling, buddy/slab
/// contention) goes through the same instruction rather than re-typing the
/// intrinsic at each call site.
#[inline(always)]
pub fn cpu_relax() {
    core::hint::spin_loop();
}

/// Spin until `cond` returns `Some`, or until `budget` iterations have
/// passed. Generalizes the status-wait-with-timeout loops scattered across
/// the ATA driver and early paging code into one combinator, per the
/// DESIGN NOTES directive to never spin forever on a hardware condition.
pub fn poll_until<T>(budget: usize, mut cond: impl FnMut() -> Option<T>) -> Result<T, Timeout> {
    for _ in 0..budget {
        if let Some(v) = cond() {
            return Ok(v);
        }
        cpu_relax();
    }
    Err(Timeout)
}

/// Returned by [`poll_until`] when the budget is exhausted without `cond`
/// succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;
