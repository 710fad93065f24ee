//! Pluggable "which ready task runs next" policies. The runqueue always
//! walks candidates in FIFO order and asks the active policy to pick one by
//! index; everything about *how* a task got onto the runqueue (fork, wake,
//! requeue after a timeslice) is policy-agnostic.

use crate::task::process::{Process, ProcessState};

pub trait SchedPolicy: Send + Sync {
    /// Choose an index into `candidates` to run next. Only entries with
    /// `state == Ready` are eligible; `candidates` may also contain
    /// `Blocked`/`Zombie` entries, which must never be returned.
    fn pick(&self, candidates: &[Process]) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// First ready candidate in queue order — what the teacher's scheduler did
/// implicitly via `pop_front`.
pub struct RoundRobin;

impl SchedPolicy for RoundRobin {
    fn pick(&self, candidates: &[Process]) -> Option<usize> {
        candidates.iter().position(|p| p.state == ProcessState::Ready)
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

/// Highest `sched.priority` among ready candidates; ties broken by queue
/// order (first-seen wins), so equal-priority tasks still round-robin
/// against each other over repeated picks.
pub struct Priority;

impl SchedPolicy for Priority {
    fn pick(&self, candidates: &[Process]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state == ProcessState::Ready)
            .max_by_key(|(i, p)| (p.sched.priority, core::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    }

    fn name(&self) -> &'static str {
        "priority"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::context::Context;
    use crate::task::process::{ProcessId, SchedParams};
    use alloc::boxed::Box;
    use alloc::string::String;
    use alloc::vec::Vec;

    fn stub(pid: u64, state: ProcessState, priority: u8) -> Process {
        Process {
            pid: ProcessId(pid),
            ppid: None,
            pgid: ProcessId(pid),
            sid: ProcessId(pid),
            uid: 0,
            gid: 0,
            name: String::from("stub"),
            state,
            exit_status: None,
            children: Vec::new(),
            sched: SchedParams { priority, period: None, wcet: None },
            periodic: None,
            context: Context::empty(),
            mm: None,
            kernel_stack: Box::new([]),
            fd_table: Process::new_fd_table(),
            signals: crate::signal::SignalState::new(),
            errno: 0,
            saved_signal: None,
        }
    }

    #[test]
    fn round_robin_picks_first_ready() {
        let procs = alloc::vec![
            stub(1, ProcessState::Blocked, 0),
            stub(2, ProcessState::Ready, 0),
            stub(3, ProcessState::Ready, 0),
        ];
        assert_eq!(RoundRobin.pick(&procs), Some(1));
    }

    #[test]
    fn priority_picks_highest_ready() {
        let procs = alloc::vec![
            stub(1, ProcessState::Ready, 1),
            stub(2, ProcessState::Ready, 5),
            stub(3, ProcessState::Ready, 3),
        ];
        assert_eq!(Priority.pick(&procs), Some(1));
    }

    #[test]
    fn priority_skips_non_ready() {
        let procs = alloc::vec![
            stub(1, ProcessState::Ready, 1),
            stub(2, ProcessState::Zombie, 9),
        ];
        assert_eq!(Priority.pick(&procs), Some(0));
    }
}
