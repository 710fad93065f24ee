//! The task/process control block: identity, credentials, scheduling
//! entity, address space, and the resources (fd table, signal state)
//! visible to the syscall layer.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex as SpinMutex;

use crate::memory::Mm;
use crate::sched::context::Context;
use crate::signal::SignalState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    /// Sleeping in a wait queue; `sleep_uninterruptible` callers cannot be
    /// woken by a signal, `sleep_interruptible` ones can.
    Blocked,
    Zombie,
}

/// Fixed scheduling parameters a policy reads to make its decision.
/// Round-robin/priority only look at `priority`; `rm`/`edf` additionally
/// need `period` and `wcet` (worst-case execution time) for admission.
#[derive(Debug, Clone, Copy)]
pub struct SchedParams {
    pub priority: u8,
    pub period: Option<u64>,
    pub wcet: Option<u64>,
}

impl Default for SchedParams {
    fn default() -> Self {
        SchedParams { priority: 0, period: None, wcet: None }
    }
}

/// A periodic task's `waitperiod` cursor: the tick at which its next period
/// starts, and whether it actually ran during the period just ended.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicState {
    pub next_wake: u64,
    pub executed: bool,
}

pub struct Process {
    pub pid: ProcessId,
    pub ppid: Option<ProcessId>,
    pub pgid: ProcessId,
    pub sid: ProcessId,
    pub uid: u32,
    pub gid: u32,

    pub name: String,
    pub state: ProcessState,
    pub exit_status: Option<u64>,
    pub children: Vec<ProcessId>,

    pub sched: SchedParams,
    /// `Some` once this task has made its first `waitperiod` call.
    pub periodic: Option<PeriodicState>,
    pub context: Context,

    /// `None` for kernel-only tasks that never gained a private address
    /// space (e.g. the boot task before its first `exec`).
    pub mm: Option<Mm>,

    pub kernel_stack: Box<[u8]>,
    pub fd_table: Vec<Option<Arc<SpinMutex<crate::fs::fd::File>>>>,
    pub signals: SignalState,
    /// Pre-handler execution state stashed by [`crate::syscall`]'s signal
    /// delivery step while a `SigHandler::User` handler runs, restored by
    /// `sigreturn`. `None` when no handler is currently executing.
    pub saved_signal: Option<crate::signal::SavedSignalFrame>,

    /// Syscall-local `errno`, set by the dispatch layer on failure and read
    /// back by `__errno_location`-style userspace convention.
    pub errno: i32,
}

pub const FD_TABLE_SIZE: usize = 64;

impl Process {
    pub fn new_fd_table() -> Vec<Option<Arc<SpinMutex<crate::fs::fd::File>>>> {
        use crate::fs::fd::File;
        let mut table = Vec::with_capacity(FD_TABLE_SIZE);
        for _ in 0..FD_TABLE_SIZE {
            table.push(None);
        }
        table[0] = Some(File::new_console());
        table[1] = Some(File::new_console());
        table[2] = Some(File::new_console());
        table
    }

    /// First unused fd at or above `from`, per POSIX `dup2`/`open` semantics.
    pub fn next_free_fd(&self, from: usize) -> Option<usize> {
        (from..self.fd_table.len()).find(|&i| self.fd_table[i].is_none())
    }
}
