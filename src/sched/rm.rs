//! Rate-Monotonic admission: priority inversely proportional to period, a
//! task set is accepted as long as total utilization stays under the
//! Liu & Layland bound — a sufficient but not necessary test, simpler than
//! full response-time analysis and adequate for the admission-time
//! ENOTSCHEDULABLE check this kernel exposes via `waitperiod`.

use alloc::vec::Vec;

use crate::kerror::KernelError;
use crate::sync::spinlock::SpinLock;

#[derive(Debug, Clone, Copy)]
pub struct PeriodicTask {
    pub period: u64,
    pub wcet: u64,
}

impl PeriodicTask {
    fn utilization(&self) -> f64 {
        self.wcet as f64 / self.period as f64
    }
}

/// `n * (2^(1/n) - 1)`, the Liu & Layland bound for `n` periodic tasks.
fn ll_bound(n: usize) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let n_f = n as f64;
    n_f * (libm_pow2_root(n_f) - 1.0)
}

/// `2^(1/n)` via repeated square-rooting (`no_std`, no `libm` dependency
/// pulled in just for this one call) — halves the exponent `n.ilog2()-ish`
/// times until it converges to within float epsilon for the small `n` this
/// kernel ever admits (task sets stay well under `MAX_PERIODIC_TASKS`).
fn libm_pow2_root(n: f64) -> f64 {
    // 2^(1/n) = exp(ln(2)/n); Newton's method on x^n = 2 avoids needing exp/ln.
    let target = 2.0_f64;
    let mut x = 1.1_f64;
    for _ in 0..64 {
        let mut pow = 1.0;
        for _ in 0..(n as u32).max(1) {
            pow *= x;
        }
        let mut pow_deriv = 0.0;
        if x != 0.0 {
            pow_deriv = pow * (n as f64) / x;
        }
        if pow_deriv.abs() < f64::EPSILON {
            break;
        }
        let next = x - (pow - target) / pow_deriv;
        if (next - x).abs() < 1e-12 {
            x = next;
            break;
        }
        x = next;
    }
    x
}

pub const MAX_PERIODIC_TASKS: usize = 32;

struct Admitted {
    tasks: Vec<PeriodicTask>,
}

static ADMITTED: SpinLock<Admitted> = SpinLock::new(Admitted { tasks: Vec::new() });

/// Try to admit `task` alongside whatever is already admitted. On success
/// the task is recorded and stays admitted until [`reset`] is called (there
/// is no per-task withdraw — a task set is fixed for the life of the
/// analysis session, matching the spec's admission-time-only check).
pub fn admit(task: PeriodicTask) -> Result<(), KernelError> {
    let mut admitted = ADMITTED.lock();
    if admitted.tasks.len() >= MAX_PERIODIC_TASKS {
        return Err(KernelError::ResourceLimit);
    }
    let total: f64 = admitted.tasks.iter().map(PeriodicTask::utilization).sum::<f64>() + task.utilization();
    let n = admitted.tasks.len() + 1;
    if total > ll_bound(n) {
        return Err(KernelError::NotSchedulable);
    }
    admitted.tasks.push(task);
    Ok(())
}

#[cfg(test)]
pub fn reset() {
    ADMITTED.lock().tasks.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_light_tasks_are_admitted() {
        reset();
        assert!(admit(PeriodicTask { period: 10, wcet: 1 }).is_ok());
        assert!(admit(PeriodicTask { period: 20, wcet: 1 }).is_ok());
    }

    #[test]
    fn overloading_utilization_is_rejected() {
        reset();
        assert!(admit(PeriodicTask { period: 10, wcet: 8 }).is_ok());
        assert!(admit(PeriodicTask { period: 10, wcet: 8 }).is_err());
    }

    #[test]
    fn bound_tightens_as_task_count_grows() {
        assert!(ll_bound(1) > ll_bound(4));
        assert!((ll_bound(1) - 1.0).abs() < 1e-6);
    }
}
