//! Earliest-Deadline-First admission: with implicit deadlines (deadline ==
//! period), the exact feasibility test is simply total utilization ≤ 1 —
//! no sufficient-but-not-necessary bound needed, unlike rate-monotonic.

use alloc::vec::Vec;

use crate::kerror::KernelError;
use crate::sync::spinlock::SpinLock;

pub use super::rm::PeriodicTask;

struct Admitted {
    tasks: Vec<PeriodicTask>,
}

static ADMITTED: SpinLock<Admitted> = SpinLock::new(Admitted { tasks: Vec::new() });

fn total_utilization(tasks: &[PeriodicTask]) -> f64 {
    tasks.iter().map(|t| t.wcet as f64 / t.period as f64).sum()
}

/// Admit `task` if doing so keeps total utilization at or under 1.0. Tasks
/// already admitted are never evicted by a later rejection — the scenario
/// in the spec's worked example admits two tasks, then rejects a third
/// while the first two stay admitted.
pub fn admit(task: PeriodicTask) -> Result<(), KernelError> {
    let mut admitted = ADMITTED.lock();
    let candidate_utilization = total_utilization(&admitted.tasks) + task.wcet as f64 / task.period as f64;
    if candidate_utilization > 1.0 {
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
    fn worked_example_from_the_admission_scenario() {
        reset();
        assert!(admit(PeriodicTask { period: 10, wcet: 3 }).is_ok());
        assert!(admit(PeriodicTask { period: 15, wcet: 4 }).is_ok());
        assert!(admit(PeriodicTask { period: 12, wcet: 6 }).is_err());

        // Prior admissions remain even after the rejection.
        let admitted = ADMITTED.lock();
        assert_eq!(admitted.tasks.len(), 2);
    }

    #[test]
    fn utilization_exactly_one_is_admitted() {
        reset();
        assert!(admit(PeriodicTask { period: 10, wcet: 5 }).is_ok());
        assert!(admit(PeriodicTask { period: 10, wcet: 5 }).is_ok());
    }
}
